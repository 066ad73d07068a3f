use crate::database::ReplicaId;
use crate::durability::{DurabilityEvent, InvocationEvent, InvokerOutcome, Phase, TransactionId};
use std::collections::BTreeMap;

/// An invocation that started but hasn't been cleared, along with what is known about each
/// replica's part in it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingInvocation {
    pub event: InvocationEvent,
    pub invokers: BTreeMap<ReplicaId, InvokerOutcome>,
}

impl PendingInvocation {
    pub fn new(event: InvocationEvent) -> Self {
        PendingInvocation {
            event,
            invokers: BTreeMap::new(),
        }
    }

    /// The replica's outcome, or None if it has no entry or its entry is still pending.
    pub fn outcome(&self, replica_id: &ReplicaId) -> Option<&InvokerOutcome> {
        self.invokers.get(replica_id).filter(|outcome| !outcome.is_pending())
    }
}

/// PendingInvocations is a view of some member's in-flight invocations, built by replaying
/// durability events. It's how a member keeps track of what its peers are doing, so that it can
/// recover on their behalf when they leave.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PendingInvocations {
    invocations: BTreeMap<(TransactionId, Phase), PendingInvocation>,
}

impl PendingInvocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &DurabilityEvent) {
        match event {
            DurabilityEvent::BeforeInvocation(e) => {
                self.invocations
                    .insert((e.transaction_id.clone(), e.phase), PendingInvocation::new(e.clone()));
            }
            DurabilityEvent::AfterInvocation(e) => {
                self.invocations.remove(&(e.transaction_id.clone(), e.phase));
            }
            DurabilityEvent::BeforeInvoker(e) | DurabilityEvent::AfterInvoker(e) => {
                // Invoker events only ever follow their invocation's BeforeInvocation.
                if let Some(pending) = self.invocations.get_mut(&(e.transaction_id.clone(), e.phase)) {
                    pending.invokers.insert(e.replica_id.clone(), e.outcome.clone());
                }
            }
        }
    }

    pub(super) fn insert(&mut self, pending: PendingInvocation) {
        self.invocations
            .insert((pending.event.transaction_id.clone(), pending.event.phase), pending);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingInvocation> {
        self.invocations.values()
    }

    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }
}

impl IntoIterator for PendingInvocations {
    type Item = PendingInvocation;
    type IntoIter = std::collections::btree_map::IntoValues<(TransactionId, Phase), PendingInvocation>;

    fn into_iter(self) -> Self::IntoIter {
        self.invocations.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durability::{ErrorDomain, InvokerEvent, RecordedValue, ResultComparison};

    fn invocation(tx: &TransactionId) -> InvocationEvent {
        InvocationEvent {
            transaction_id: tx.clone(),
            phase: Phase::Commit,
            error_domain: ErrorDomain::Sql,
            comparison: ResultComparison::Compare,
        }
    }

    fn invoker(tx: &TransactionId, replica: &str, outcome: InvokerOutcome) -> InvokerEvent {
        InvokerEvent {
            transaction_id: tx.clone(),
            phase: Phase::Commit,
            replica_id: ReplicaId::new(replica),
            outcome,
        }
    }

    #[test]
    fn replaying_events_tracks_outcomes_until_cleared() {
        // -- setup --
        let tx = TransactionId::random();
        let mut view = PendingInvocations::new();

        // -- execute --
        view.apply(&DurabilityEvent::BeforeInvocation(invocation(&tx)));
        view.apply(&DurabilityEvent::BeforeInvoker(invoker(&tx, "db1", InvokerOutcome::Pending)));
        view.apply(&DurabilityEvent::BeforeInvoker(invoker(&tx, "db2", InvokerOutcome::Pending)));
        view.apply(&DurabilityEvent::AfterInvoker(invoker(
            &tx,
            "db1",
            InvokerOutcome::Success(RecordedValue::of(&1)),
        )));

        // -- verify --
        let pending = view.iter().next().unwrap();
        assert!(pending.outcome(&ReplicaId::new("db1")).is_some());
        assert!(pending.outcome(&ReplicaId::new("db2")).is_none());
        assert_eq!(pending.invokers.len(), 2);

        view.apply(&DurabilityEvent::AfterInvocation(invocation(&tx)));
        assert!(view.is_empty());
    }
}
