use crate::database::ReplicaId;
use crate::dispatch::InvocationError;
use crate::durability::{InvokerOutcome, RecordedValue, ResultComparison};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// What one replica did with an invocation.
#[derive(Debug)]
pub(super) enum Outcome<O, E> {
    Success(O),
    Failure(E),
    /// No answer within the dispatch timeout.
    TimedOut,
    /// The invoking task died.
    Lost,
}

impl<O: Serialize, E: fmt::Display> Outcome<O, E> {
    pub fn recorded(&self) -> InvokerOutcome {
        match self {
            Outcome::Success(value) => InvokerOutcome::Success(RecordedValue::of(value)),
            Outcome::Failure(error) => InvokerOutcome::Failure(RecordedValue::of_error(error)),
            Outcome::TimedOut => InvokerOutcome::Failure(RecordedValue::of_error(&"timed out")),
            Outcome::Lost => InvokerOutcome::Failure(RecordedValue::of_error(&"lost")),
        }
    }
}

impl<O, E> From<Result<O, E>> for Outcome<O, E> {
    fn from(result: Result<O, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(error) => Outcome::Failure(error),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(super) enum Reason {
    /// The replica failed (classified failure, timeout, lost task).
    Failure,
    /// The replica disagrees with the primary.
    Divergence,
}

pub(super) struct Reconciled<O, E> {
    pub deactivate: Vec<(ReplicaId, Reason)>,
    pub result: Result<O, InvocationError<E>>,
}

/// Turns the outcomes of a fan-out into the caller's result and the replicas to deactivate.
///
/// Replica failures are deactivated first, unless that would leave no active replica and the
/// cluster doesn't allow that. The lowest remaining replica then acts as primary: its outcome is
/// the result, and every replica whose outcome differs from it is deactivated.
///
/// `active` is the number of active replicas, which can exceed the number of outcomes when
/// only some replicas were invoked.
pub(super) fn reconcile<O, E>(
    outcomes: BTreeMap<ReplicaId, Outcome<O, E>>,
    is_failure: impl Fn(&E) -> bool,
    allow_empty: bool,
    active: usize,
    comparison: ResultComparison,
) -> Reconciled<O, E>
where
    O: PartialEq,
    E: PartialEq,
{
    if outcomes.is_empty() {
        return Reconciled {
            deactivate: vec![],
            result: Err(InvocationError::NoActiveReplicas),
        };
    }

    let is_replica_failure = |outcome: &Outcome<O, E>| match outcome {
        Outcome::Success(_) => false,
        Outcome::Failure(e) => is_failure(e),
        Outcome::TimedOut | Outcome::Lost => true,
    };
    let failed: Vec<ReplicaId> = outcomes
        .iter()
        .filter(|(_, outcome)| is_replica_failure(outcome))
        .map(|(id, _)| id.clone())
        .collect();

    let mut outcomes = outcomes;
    if failed.len() >= active && !allow_empty {
        // Every replica failed. More likely the problem is on our side, so keep them all.
        let (_, primary) = outcomes
            .into_iter()
            .next()
            .expect("outcomes checked non-empty above");
        return Reconciled {
            deactivate: vec![],
            result: Err(into_error(primary)),
        };
    }

    let mut deactivate: Vec<(ReplicaId, Reason)> = Vec::new();
    let mut first_failure = None;
    for id in failed {
        if let Some(outcome) = outcomes.remove(&id) {
            first_failure.get_or_insert(outcome);
        }
        deactivate.push((id, Reason::Failure));
    }

    let mut remaining = outcomes.into_iter();
    let primary = match remaining.next() {
        Some((_, primary)) => primary,
        None => {
            // Only possible when empty clusters are allowed.
            let failure = first_failure.expect("at least one failure when all outcomes were failures");
            return Reconciled {
                deactivate,
                result: Err(into_error(failure)),
            };
        }
    };

    let result = match primary {
        Outcome::Success(expected) => {
            for (id, outcome) in remaining {
                let consistent = match &outcome {
                    Outcome::Success(actual) => {
                        comparison == ResultComparison::Ignore || actual == &expected
                    }
                    _ => false,
                };
                if !consistent {
                    deactivate.push((id, Reason::Divergence));
                }
            }
            Ok(expected)
        }
        primary_failure => {
            for (id, outcome) in remaining {
                let consistent = match (&primary_failure, &outcome) {
                    (Outcome::Failure(expected), Outcome::Failure(actual)) => actual == expected,
                    _ => false,
                };
                if !consistent {
                    deactivate.push((id, Reason::Divergence));
                }
            }
            Err(into_error(primary_failure))
        }
    };

    Reconciled { deactivate, result }
}

pub(super) fn into_error<O, E>(outcome: Outcome<O, E>) -> InvocationError<E> {
    match outcome {
        Outcome::Failure(e) => InvocationError::Replica(e),
        Outcome::TimedOut | Outcome::Lost => InvocationError::TimedOut,
        Outcome::Success(_) => unreachable!("successful outcome is not an error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        ConnectionLost,
        Duplicate(&'static str),
    }

    fn is_failure(e: &TestError) -> bool {
        matches!(e, TestError::ConnectionLost)
    }

    fn outcomes(list: Vec<(&str, Outcome<&'static str, TestError>)>) -> BTreeMap<ReplicaId, Outcome<&'static str, TestError>> {
        list.into_iter().map(|(id, o)| (ReplicaId::new(id), o)).collect()
    }

    fn run(
        list: Vec<(&str, Outcome<&'static str, TestError>)>,
        allow_empty: bool,
        comparison: ResultComparison,
    ) -> (Vec<(String, Reason)>, Result<&'static str, InvocationError<TestError>>) {
        let active = list.len();
        let reconciled = reconcile(outcomes(list), is_failure, allow_empty, active, comparison);
        let deactivated = reconciled
            .deactivate
            .into_iter()
            .map(|(id, reason)| (id.into_inner(), reason))
            .collect();
        (deactivated, reconciled.result)
    }

    #[test]
    fn divergent_backup_is_deactivated_and_primary_result_wins() {
        let (deactivated, result) = run(
            vec![("a", Outcome::Success("X")), ("b", Outcome::Success("Y"))],
            false,
            ResultComparison::Compare,
        );

        assert_eq!(deactivated, vec![("b".to_string(), Reason::Divergence)]);
        assert_eq!(result.unwrap(), "X");
    }

    #[test]
    fn ignored_comparison_keeps_differing_results() {
        let (deactivated, result) = run(
            vec![("a", Outcome::Success("X")), ("b", Outcome::Success("Y"))],
            false,
            ResultComparison::Ignore,
        );

        assert!(deactivated.is_empty());
        assert_eq!(result.unwrap(), "X");
    }

    #[test]
    fn backup_succeeding_where_primary_threw_is_deactivated() {
        let (deactivated, result) = run(
            vec![("a", Outcome::Failure(TestError::Duplicate("k"))), ("b", Outcome::Success("Y"))],
            false,
            ResultComparison::Compare,
        );

        assert_eq!(deactivated, vec![("b".to_string(), Reason::Divergence)]);
        assert!(matches!(result, Err(InvocationError::Replica(TestError::Duplicate("k")))));
    }

    #[test]
    fn equal_application_errors_are_consistent() {
        let (deactivated, result) = run(
            vec![
                ("a", Outcome::Failure(TestError::Duplicate("k"))),
                ("b", Outcome::Failure(TestError::Duplicate("k"))),
                ("c", Outcome::Failure(TestError::Duplicate("other"))),
            ],
            false,
            ResultComparison::Compare,
        );

        assert_eq!(deactivated, vec![("c".to_string(), Reason::Divergence)]);
        assert!(matches!(result, Err(InvocationError::Replica(TestError::Duplicate("k")))));
    }

    #[test]
    fn all_failures_deactivate_nothing_when_empty_disallowed() {
        let (deactivated, result) = run(
            vec![
                ("a", Outcome::Failure(TestError::ConnectionLost)),
                ("b", Outcome::Failure(TestError::ConnectionLost)),
            ],
            false,
            ResultComparison::Compare,
        );

        assert!(deactivated.is_empty());
        assert!(matches!(result, Err(InvocationError::Replica(TestError::ConnectionLost))));
    }

    #[test]
    fn all_failures_deactivate_everything_when_empty_allowed() {
        let (deactivated, result) = run(
            vec![("a", Outcome::TimedOut), ("b", Outcome::Failure(TestError::ConnectionLost))],
            true,
            ResultComparison::Compare,
        );

        assert_eq!(
            deactivated,
            vec![("a".to_string(), Reason::Failure), ("b".to_string(), Reason::Failure)]
        );
        assert!(matches!(result, Err(InvocationError::TimedOut)));
    }

    #[test]
    fn failed_primary_hands_over_to_next_replica() {
        // -- setup --
        let list = vec![
            ("a", Outcome::Failure(TestError::ConnectionLost)),
            ("b", Outcome::Success("X")),
            ("c", Outcome::Success("X")),
            ("d", Outcome::Lost),
        ];

        // -- execute --
        let (deactivated, result) = run(list, false, ResultComparison::Compare);

        // -- verify --
        assert_eq!(
            deactivated,
            vec![("a".to_string(), Reason::Failure), ("d".to_string(), Reason::Failure)]
        );
        assert_eq!(result.unwrap(), "X");
    }

    #[test]
    fn partial_fan_out_may_deactivate_every_invoked_replica() {
        // Two replicas invoked out of three active: losing both still leaves one.
        let reconciled = reconcile(
            outcomes(vec![("a", Outcome::TimedOut), ("b", Outcome::TimedOut)]),
            is_failure,
            false,
            3,
            ResultComparison::Compare,
        );

        assert_eq!(reconciled.deactivate.len(), 2);
        assert!(matches!(reconciled.result, Err(InvocationError::TimedOut)));
    }

    #[test]
    fn no_outcomes_means_no_active_replicas() {
        let (deactivated, result) = run(vec![], false, ResultComparison::Compare);

        assert!(deactivated.is_empty());
        assert!(matches!(result, Err(InvocationError::NoActiveReplicas)));
    }
}
