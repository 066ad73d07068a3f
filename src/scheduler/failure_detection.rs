use crate::balancer::Balancer;
use crate::database::{ConnectionFactory, Replica};
use crate::dispatch::ReplicaDeactivator;
use crate::scheduler::ScheduledTask;
use std::sync::Arc;
use tokio::time::Duration;

/// Whether `replica` accepts a connection that reports itself valid within `timeout`.
pub async fn probe(connections: &dyn ConnectionFactory, replica: &Replica, timeout: Duration) -> bool {
    let check = async {
        match connections.connect(replica).await {
            Ok(connection) => {
                let valid = connection.is_valid().await;
                connection.close().await;
                valid
            }
            Err(_) => false,
        }
    };
    tokio::time::timeout(timeout, check).await.unwrap_or(false)
}

/// Probes every active replica and deactivates the ones that don't answer.
///
/// If none of them answer, the problem is more likely on this side, so nothing is deactivated
/// unless the cluster is allowed to become empty.
pub struct FailureDetectionTask {
    logger: slog::Logger,
    balancer: Balancer,
    connections: Arc<dyn ConnectionFactory>,
    deactivator: Arc<dyn ReplicaDeactivator>,
    probe_timeout: Duration,
    allow_empty: bool,
}

impl FailureDetectionTask {
    pub fn new(
        logger: slog::Logger,
        balancer: Balancer,
        connections: Arc<dyn ConnectionFactory>,
        deactivator: Arc<dyn ReplicaDeactivator>,
        probe_timeout: Duration,
        allow_empty: bool,
    ) -> Self {
        FailureDetectionTask {
            logger,
            balancer,
            connections,
            deactivator,
            probe_timeout,
            allow_empty,
        }
    }
}

#[async_trait::async_trait]
impl ScheduledTask for FailureDetectionTask {
    fn name(&self) -> &'static str {
        "failure-detection"
    }

    async fn run(&self) {
        let active = self.balancer.replicas();
        let probes = active
            .iter()
            .map(|replica| probe(self.connections.as_ref(), replica, self.probe_timeout));
        let alive = futures::future::join_all(probes).await;

        let failed: Vec<&Replica> = active
            .iter()
            .zip(alive)
            .filter(|(_, alive)| !alive)
            .map(|(replica, _)| replica)
            .collect();
        if failed.is_empty() {
            return;
        }
        if failed.len() == active.len() && !self.allow_empty {
            slog::error!(
                self.logger,
                "No active replica responded; keeping all {} active",
                active.len()
            );
            return;
        }

        for replica in failed {
            slog::warn!(self.logger, "Replica {} failed liveness probe", replica.id());
            self.deactivator.deactivate(replica.id()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::BalancerPolicy;
    use crate::database::{ConnectionDescriptor, MemoryDatabase, MemoryDatabases, ReplicaId};

    struct BalancerDeactivator(Balancer);

    #[async_trait::async_trait]
    impl ReplicaDeactivator for BalancerDeactivator {
        async fn deactivate(&self, replica_id: &ReplicaId) -> bool {
            self.0.remove(replica_id)
        }
    }

    fn setup(ids: &[&str]) -> (FailureDetectionTask, Balancer, Arc<MemoryDatabases>) {
        let balancer = Balancer::new(BalancerPolicy::RoundRobin);
        let databases = Arc::new(MemoryDatabases::new());
        for id in ids {
            balancer.add(Replica::new(*id, ConnectionDescriptor::new("mem://")));
            databases.insert(ReplicaId::new(*id), Arc::new(MemoryDatabase::new()));
        }
        let task = FailureDetectionTask::new(
            slog::Logger::root(slog::Discard, slog::o!()),
            balancer.clone(),
            databases.clone(),
            Arc::new(BalancerDeactivator(balancer.clone())),
            Duration::from_secs(1),
            false,
        );
        (task, balancer, databases)
    }

    #[tokio::test]
    async fn deactivates_unresponsive_replica() {
        // -- setup --
        let (task, balancer, databases) = setup(&["db1", "db2", "db3"]);
        databases.get(&ReplicaId::new("db2")).unwrap().set_valid(false);

        // -- execute --
        task.run().await;

        // -- verify --
        assert_eq!(
            balancer.snapshot().ids(),
            vec![ReplicaId::new("db1"), ReplicaId::new("db3")]
        );
    }

    #[tokio::test]
    async fn keeps_everything_when_nothing_responds() {
        let (task, balancer, databases) = setup(&["db1", "db2"]);
        for id in ["db1", "db2"] {
            databases.get(&ReplicaId::new(id)).unwrap().set_valid(false);
        }

        task.run().await;

        assert_eq!(balancer.len(), 2);
    }
}
