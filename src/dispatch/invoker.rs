use crate::database::{Replica, ReplicaId};
use crate::durability::ResultComparison;
use serde::Serialize;

/// Invoker performs one operation against one replica, through that replica's target (its
/// connection, statement, or whatever handle the operation runs on).
///
/// The dispatcher runs the same invoker against many replicas concurrently and compares the
/// outputs, so outputs must be comparable and recordable.
#[async_trait::async_trait]
pub trait Invoker<T, E>: Send + Sync
where
    T: Send + Sync + 'static,
    E: Send + 'static,
{
    type Output: Clone + PartialEq + Serialize + Send + Sync + 'static;

    async fn invoke(&self, replica: &Replica, target: &T) -> Result<Self::Output, E>;

    /// Operations with results that legitimately differ per replica (generated keys,
    /// timestamps, ...) return `Ignore`.
    fn result_comparison(&self) -> ResultComparison {
        ResultComparison::Compare
    }
}

/// Tells replica failures (lost connection, replica down) from application errors (constraint
/// violation, bad SQL). Only replica failures get a replica deactivated.
pub trait FailureClassifier<E>: Send + Sync {
    fn is_failure(&self, error: &E) -> bool;
}

impl<E, F> FailureClassifier<E> for F
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn is_failure(&self, error: &E) -> bool {
        self(error)
    }
}

/// Where the dispatcher sends deactivations. The state manager in a cluster.
#[async_trait::async_trait]
pub trait ReplicaDeactivator: Send + Sync {
    /// Returns false if the replica wasn't deactivated, e.g. because it is the last one.
    async fn deactivate(&self, replica_id: &ReplicaId) -> bool;
}
