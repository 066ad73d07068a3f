use crate::durability::record;
use crate::durability::{DurabilityError, DurabilityEvent, DurabilityListener, PendingInvocation, PendingInvocations};
use crate::storage::{Keyspace, PersistentLog, StorageError, WriteBatch};
use std::sync::Arc;

/// LocalDurabilityLog persists this member's own durability events so that invocations cut
/// short by a crash can be found and recovered at the next start.
#[derive(Clone)]
pub struct LocalDurabilityLog {
    log: Arc<dyn PersistentLog>,
}

impl LocalDurabilityLog {
    pub fn new(log: Arc<dyn PersistentLog>) -> Self {
        LocalDurabilityLog { log }
    }

    pub fn record(&self, event: &DurabilityEvent) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        match event {
            DurabilityEvent::BeforeInvocation(e) => {
                batch.put(
                    Keyspace::Invocations,
                    record::invocation_key(&e.transaction_id, e.phase),
                    record::encode_invocation(e),
                );
            }
            DurabilityEvent::AfterInvocation(e) => {
                let key = record::invocation_key(&e.transaction_id, e.phase);
                batch
                    .delete(Keyspace::Invocations, key.clone())
                    .delete_prefix(Keyspace::Invokers, key);
            }
            DurabilityEvent::BeforeInvoker(e) | DurabilityEvent::AfterInvoker(e) => {
                batch.put(
                    Keyspace::Invokers,
                    record::invoker_key(&e.transaction_id, e.phase, &e.replica_id),
                    record::encode_invoker(e),
                );
            }
        }

        self.log.apply(batch)
    }

    /// Everything left behind by invocations that never finished.
    pub fn pending(&self) -> Result<PendingInvocations, StorageError> {
        let mut pending = PendingInvocations::new();
        for (key, value) in self.log.scan(Keyspace::Invocations)? {
            let mut invocation = PendingInvocation::new(record::decode_invocation(&key, &value)?);
            for (invoker_key, invoker_value) in self.log.scan_prefix(Keyspace::Invokers, &key)? {
                let invoker = record::decode_invoker(&invoker_key, &invoker_value)?;
                invocation.invokers.insert(invoker.replica_id, invoker.outcome);
            }
            pending.insert(invocation);
        }

        Ok(pending)
    }

    /// Forgets a recovered invocation along with its invoker entries.
    pub fn clear(&self, pending: &PendingInvocation) -> Result<(), StorageError> {
        self.record(&DurabilityEvent::AfterInvocation(pending.event.clone()))
    }
}

// A log with no group behind it is a listener on its own: standalone dispatchers use it directly.
#[async_trait::async_trait]
impl DurabilityListener for LocalDurabilityLog {
    async fn on_durability_event(&self, event: DurabilityEvent) -> Result<(), DurabilityError> {
        Ok(self.record(&event)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ReplicaId;
    use crate::durability::{
        ErrorDomain, InvocationEvent, InvokerEvent, InvokerOutcome, Phase, RecordedValue, ResultComparison,
        TransactionId,
    };
    use crate::storage::InMemoryLog;

    #[test]
    fn unfinished_invocations_are_pending_finished_ones_are_not() {
        // -- setup --
        let log = LocalDurabilityLog::new(Arc::new(InMemoryLog::new()));
        let finished = InvocationEvent {
            transaction_id: TransactionId::random(),
            phase: Phase::Commit,
            error_domain: ErrorDomain::Sql,
            comparison: ResultComparison::Compare,
        };
        let unfinished = InvocationEvent {
            transaction_id: TransactionId::random(),
            ..finished.clone()
        };

        // -- execute --
        for invocation in [&finished, &unfinished] {
            log.record(&DurabilityEvent::BeforeInvocation(invocation.clone())).unwrap();
            log.record(&DurabilityEvent::AfterInvoker(InvokerEvent {
                transaction_id: invocation.transaction_id.clone(),
                phase: Phase::Commit,
                replica_id: ReplicaId::new("db1"),
                outcome: InvokerOutcome::Success(RecordedValue::of(&42)),
            }))
            .unwrap();
        }
        log.record(&DurabilityEvent::AfterInvocation(finished)).unwrap();

        // -- verify --
        let pending: Vec<PendingInvocation> = log.pending().unwrap().into_iter().collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event, unfinished);
        assert_eq!(
            pending[0].outcome(&ReplicaId::new("db1")),
            Some(&InvokerOutcome::Success(RecordedValue::of(&42)))
        );

        log.clear(&pending[0]).unwrap();
        assert!(log.pending().unwrap().is_empty());
    }
}
