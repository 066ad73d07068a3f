use crate::durability::{DurabilityEvent, InvocationEvent, InvokerEvent};
use crate::storage::StorageError;
use std::sync::Arc;

/// How much of each multi-replica invocation is made durable.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DurabilityLevel {
    /// Nothing is tracked. A crash mid-invocation leaves replicas in an unknown state.
    None,
    /// Invocations and the replicas they were dispatched to, but not the outcomes.
    Coarse,
    /// Invocations and every replica's outcome.
    Fine,
}

/// DurabilityListener receives the events `Durability` decides to keep. The state manager is
/// the production listener: it writes the local log and relays to the group.
#[async_trait::async_trait]
pub trait DurabilityListener: Send + Sync {
    async fn on_durability_event(&self, event: DurabilityEvent) -> Result<(), DurabilityError>;
}

/// Durability filters the dispatcher's invocation lifecycle by level before handing it to the
/// listener.
#[derive(Clone)]
pub struct Durability {
    level: DurabilityLevel,
    listener: Arc<dyn DurabilityListener>,
}

impl Durability {
    pub fn new(level: DurabilityLevel, listener: Arc<dyn DurabilityListener>) -> Self {
        Durability { level, listener }
    }

    pub fn level(&self) -> DurabilityLevel {
        self.level
    }

    pub async fn before_invocation(&self, event: &InvocationEvent) -> Result<(), DurabilityError> {
        if self.level == DurabilityLevel::None {
            return Ok(());
        }
        self.emit(DurabilityEvent::BeforeInvocation(event.clone())).await
    }

    pub async fn after_invocation(&self, event: &InvocationEvent) -> Result<(), DurabilityError> {
        if self.level == DurabilityLevel::None {
            return Ok(());
        }
        self.emit(DurabilityEvent::AfterInvocation(event.clone())).await
    }

    pub async fn before_invoker(&self, event: &InvokerEvent) -> Result<(), DurabilityError> {
        if self.level == DurabilityLevel::None {
            return Ok(());
        }
        self.emit(DurabilityEvent::BeforeInvoker(event.clone())).await
    }

    pub async fn after_invoker(&self, event: &InvokerEvent) -> Result<(), DurabilityError> {
        if self.level != DurabilityLevel::Fine {
            return Ok(());
        }
        self.emit(DurabilityEvent::AfterInvoker(event.clone())).await
    }

    async fn emit(&self, event: DurabilityEvent) -> Result<(), DurabilityError> {
        self.listener.on_durability_event(event).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DurabilityError {
    #[error("Failed to persist durability event")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ReplicaId;
    use crate::durability::{ErrorDomain, InvokerOutcome, Phase, RecordedValue, ResultComparison, TransactionId};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<DurabilityEvent>>,
    }

    #[async_trait::async_trait]
    impl DurabilityListener for RecordingListener {
        async fn on_durability_event(&self, event: DurabilityEvent) -> Result<(), DurabilityError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    async fn run_lifecycle(level: DurabilityLevel) -> Vec<&'static str> {
        let listener = Arc::new(RecordingListener::default());
        let durability = Durability::new(level, listener.clone());
        let tx = TransactionId::random();
        let invocation = InvocationEvent {
            transaction_id: tx.clone(),
            phase: Phase::Commit,
            error_domain: ErrorDomain::Sql,
            comparison: ResultComparison::Compare,
        };
        let mut invoker = InvokerEvent {
            transaction_id: tx,
            phase: Phase::Commit,
            replica_id: ReplicaId::new("db1"),
            outcome: InvokerOutcome::Pending,
        };

        durability.before_invocation(&invocation).await.unwrap();
        durability.before_invoker(&invoker).await.unwrap();
        invoker.outcome = InvokerOutcome::Success(RecordedValue::of(&1));
        durability.after_invoker(&invoker).await.unwrap();
        durability.after_invocation(&invocation).await.unwrap();

        let events = listener.events.lock().unwrap();
        let kinds = events
            .iter()
            .map(|e| match e {
                DurabilityEvent::BeforeInvocation(_) => "before_invocation",
                DurabilityEvent::AfterInvocation(_) => "after_invocation",
                DurabilityEvent::BeforeInvoker(_) => "before_invoker",
                DurabilityEvent::AfterInvoker(_) => "after_invoker",
            })
            .collect();
        kinds
    }

    #[tokio::test]
    async fn level_filters_events() {
        assert!(run_lifecycle(DurabilityLevel::None).await.is_empty());
        assert_eq!(
            run_lifecycle(DurabilityLevel::Coarse).await,
            vec!["before_invocation", "before_invoker", "after_invocation"]
        );
        assert_eq!(
            run_lifecycle(DurabilityLevel::Fine).await,
            vec!["before_invocation", "before_invoker", "after_invoker", "after_invocation"]
        );
    }
}
