use crate::balancer::Snapshot;
use crate::database::ReplicaId;
use crate::durability::{DurabilityLevel, InvokerOutcome, PendingInvocation, ResultComparison};

/// Decides which active replicas can no longer be trusted after `pending` was cut short.
///
/// The primary is the reference. At the coarse level the log only says which replicas were
/// dispatched to, so all of them but the primary are suspect. At the fine level each backup's
/// recorded outcome is held against the primary's.
pub fn replicas_to_deactivate(
    level: DurabilityLevel,
    pending: &PendingInvocation,
    active: &Snapshot,
) -> Vec<ReplicaId> {
    let primary = match active.primary() {
        Some(primary) => primary.id(),
        None => return vec![],
    };
    let backups = active.iter().map(|r| r.id()).filter(|id| *id != primary);

    match level {
        DurabilityLevel::None => vec![],
        DurabilityLevel::Coarse => backups
            .filter(|id| pending.invokers.contains_key(*id))
            .cloned()
            .collect(),
        DurabilityLevel::Fine => {
            let reference = pending.outcome(primary);
            backups
                .filter(|id| is_suspect(reference, pending.outcome(id), pending.event.comparison))
                .cloned()
                .collect()
        }
    }
}

fn is_suspect(
    primary: Option<&InvokerOutcome>,
    backup: Option<&InvokerOutcome>,
    comparison: ResultComparison,
) -> bool {
    match (primary, backup) {
        // The primary never finished: only a backup that did is out of step.
        (None, backup) => backup.is_some(),
        (Some(_), None) => true,
        (Some(InvokerOutcome::Success(expected)), Some(InvokerOutcome::Success(actual))) => {
            comparison == ResultComparison::Compare && expected != actual
        }
        (Some(InvokerOutcome::Failure(expected)), Some(InvokerOutcome::Failure(actual))) => expected != actual,
        (Some(InvokerOutcome::Success(_)), Some(InvokerOutcome::Failure(_))) => true,
        (Some(InvokerOutcome::Failure(_)), Some(InvokerOutcome::Success(_))) => true,
        // Pending outcomes are filtered out by PendingInvocation::outcome().
        (Some(InvokerOutcome::Pending), _) | (_, Some(InvokerOutcome::Pending)) => false,
    }
}
