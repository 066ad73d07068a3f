use crate::balancer::Balancer;
use crate::cluster::node::ClusterNode;
use crate::cluster::options::ClusterOptionsValidated;
use crate::database::{ConnectionFactory, Replica, ReplicaId};
use crate::dispatch::{Dispatcher, DispatcherConfig, FailureClassifier, ReplicaDeactivator, TargetFactory};
use crate::durability::Durability;
use crate::lock::DistributedLockManager;
use crate::scheduler::{
    self, AutoActivationTask, FailureDetectionTask, RealClock, ReplicaActivator, ScheduledTask, Scheduler,
};
use crate::state::{StateError, StateManager};
use crate::sync::{synchronize_sequences, SynchronizationContext, SynchronizationError, SynchronizationStrategy};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// DatabaseCluster is one member's handle on a cluster of replicas. Cloning is cheap and every
/// clone drives the same member.
#[derive(Clone)]
pub struct DatabaseCluster {
    inner: Arc<ClusterInner>,
}

pub(super) struct ClusterInner {
    pub id: String,
    pub logger: slog::Logger,
    pub replicas: Arc<BTreeMap<ReplicaId, Replica>>,
    pub balancer: Balancer,
    pub state: Arc<StateManager>,
    pub locks: Arc<DistributedLockManager>,
    pub connections: Arc<dyn ConnectionFactory>,
    pub strategies: BTreeMap<String, Arc<dyn SynchronizationStrategy>>,
    pub scheduler: Scheduler,
    pub options: ClusterOptionsValidated,
    // The transport only holds the receiver weakly.
    pub _node: Arc<ClusterNode>,
}

impl DatabaseCluster {
    pub(super) fn new(inner: ClusterInner) -> Self {
        DatabaseCluster { inner: Arc::new(inner) }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn replica(&self, replica_id: &ReplicaId) -> Option<&Replica> {
        self.inner.replicas.get(replica_id)
    }

    /// Every configured replica, active or not, in replica order.
    pub fn replicas(&self) -> impl Iterator<Item = &Replica> {
        self.inner.replicas.values()
    }

    pub fn is_active(&self, replica_id: &ReplicaId) -> bool {
        self.inner.balancer.contains(replica_id)
    }

    pub fn active_replicas(&self) -> Vec<ReplicaId> {
        self.inner.balancer.snapshot().ids()
    }

    pub fn balancer(&self) -> &Balancer {
        &self.inner.balancer
    }

    pub fn synchronization_strategies(&self) -> Vec<&str> {
        self.inner.strategies.keys().map(String::as_str).collect()
    }

    pub fn lock_manager(&self) -> &DistributedLockManager {
        &self.inner.locks
    }

    /// Creates a dispatcher whose invocations are made durable and whose deactivations go
    /// through this member's state manager.
    pub fn dispatcher<T, E>(
        &self,
        targets: Arc<dyn TargetFactory<T, E>>,
        classifier: Arc<dyn FailureClassifier<E>>,
    ) -> Dispatcher<T, E>
    where
        T: Send + Sync + 'static,
        E: fmt::Display + PartialEq + Send + Sync + 'static,
    {
        Dispatcher::new(DispatcherConfig {
            logger: self.inner.logger.new(slog::o!("Component" => "Dispatcher")),
            balancer: self.inner.balancer.clone(),
            targets,
            durability: Durability::new(self.inner.options.durability, self.inner.state.clone()),
            deactivator: self.inner.state.clone(),
            classifier,
            locks: self.inner.locks.local().clone(),
            options: self.inner.options.dispatch_options(),
        })
    }

    /// Synchronizes the replica with the default strategy and activates it.
    pub async fn activate(&self, replica_id: &ReplicaId) -> Result<bool, ActivationError> {
        self.inner.activate(replica_id).await
    }

    /// Synchronizes the replica with the given strategy and activates it. Returns false if
    /// it was already active.
    pub async fn activate_with(&self, replica_id: &ReplicaId, strategy_id: &str) -> Result<bool, ActivationError> {
        self.inner.activate_with(replica_id, strategy_id).await
    }

    /// Won't deactivate the last active replica unless the cluster may become empty.
    pub async fn deactivate(&self, replica_id: &ReplicaId) -> Result<bool, StateError> {
        self.inner.state.deactivate(replica_id).await
    }

    /// Joins the cluster state and starts the scheduled tasks. Returns the active replicas.
    ///
    /// If nobody remembers any active replica, this is a fresh cluster: every replica that
    /// answers a probe is assumed to be in sync and gets activated.
    pub async fn start(&self) -> Result<Vec<ReplicaId>, StateError> {
        let inner = &self.inner;
        let restored = inner.state.start().await?;
        if restored.is_empty() {
            slog::info!(inner.logger, "No active replicas on record; probing all replicas");
            for replica in inner.replicas.values() {
                if scheduler::probe(inner.connections.as_ref(), replica, inner.options.probe_timeout).await {
                    inner.state.activate(replica.id()).await?;
                } else {
                    slog::warn!(inner.logger, "Replica {} didn't answer; leaving it inactive", replica.id());
                }
            }
        }

        if let Some(interval) = inner.options.failure_detection_interval {
            let deactivator: Arc<dyn ReplicaDeactivator> = inner.state.clone();
            let task = FailureDetectionTask::new(
                inner.logger.clone(),
                inner.balancer.clone(),
                inner.connections.clone(),
                deactivator,
                inner.options.probe_timeout,
                inner.options.allow_empty_cluster,
            );
            inner.scheduler.schedule(Arc::new(task), interval, RealClock);
        }
        if let Some(interval) = inner.options.auto_activation_interval {
            let activator: Arc<dyn ReplicaActivator> = self.inner.clone();
            let task: Arc<dyn ScheduledTask> =
                Arc::new(AutoActivationTask::new(inner.logger.clone(), Arc::downgrade(&activator)));
            inner.scheduler.schedule(task, interval, RealClock);
        }

        let active = inner.balancer.snapshot().ids();
        slog::info!(inner.logger, "Cluster {} started with {:?}", inner.id, active);
        Ok(active)
    }

    /// Stops the scheduled tasks and takes embedded replicas out of service on this member.
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.scheduler.stop().await;
        inner.state.stop();

        for replica in inner.balancer.replicas() {
            if !replica.is_embedded() {
                continue;
            }
            if let Err(e) = inner.state.deactivate_local(replica.id()).await {
                slog::error!(inner.logger, "Failed to deactivate embedded replica {}: {}", replica.id(), e);
            }
        }
        slog::info!(inner.logger, "Cluster {} stopped", inner.id);
    }
}

impl ClusterInner {
    async fn activate_with(&self, replica_id: &ReplicaId, strategy_id: &str) -> Result<bool, ActivationError> {
        let replica = self
            .replicas
            .get(replica_id)
            .cloned()
            .ok_or_else(|| ActivationError::UnknownReplica(replica_id.clone()))?;
        let strategy = self
            .strategies
            .get(strategy_id)
            .cloned()
            .ok_or_else(|| SynchronizationError::UnknownStrategy(strategy_id.to_string()))?;
        if self.balancer.contains(replica_id) {
            return Ok(false);
        }

        let lock = self.locks.write_lock(None).await;
        let result = self.synchronize_and_activate(replica, strategy.as_ref()).await;
        lock.unlock().await;
        result
    }

    async fn synchronize_and_activate(
        &self,
        replica: Replica,
        strategy: &dyn SynchronizationStrategy,
    ) -> Result<bool, ActivationError> {
        // Somebody may have activated it while we waited for the lock.
        if self.balancer.contains(replica.id()) {
            return Ok(false);
        }

        match self.balancer.primary() {
            None => slog::info!(
                self.logger,
                "Activating {} into an empty cluster, nothing to synchronize from",
                replica.id()
            ),
            Some(source) => {
                let logger = self.logger.new(slog::o!("Strategy" => strategy.id().to_string()));
                let context = SynchronizationContext::open(
                    logger,
                    self.connections.as_ref(),
                    source,
                    replica.clone(),
                    self.balancer.replicas(),
                    self.options.sync_options(),
                )
                .await?;
                let result = synchronize(&context, strategy).await;
                context.close().await;
                result?;
            }
        }

        let activated = self.state.activate(replica.id()).await?;
        if activated {
            slog::info!(self.logger, "Activated {}", replica.id());
        }
        Ok(activated)
    }
}

async fn synchronize(
    context: &SynchronizationContext,
    strategy: &dyn SynchronizationStrategy,
) -> Result<(), SynchronizationError> {
    slog::info!(
        context.logger(),
        "Synchronizing {} from {}",
        context.target_replica().id(),
        context.source_replica().id()
    );
    strategy.synchronize(context).await?;
    if strategy.synchronizes_sequences() {
        synchronize_sequences(context).await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl ReplicaActivator for ClusterInner {
    fn inactive_replicas(&self) -> Vec<ReplicaId> {
        let active = self.balancer.snapshot();
        self.replicas
            .keys()
            .filter(|replica_id| !active.contains(replica_id))
            .cloned()
            .collect()
    }

    async fn activate(&self, replica_id: &ReplicaId) -> Result<bool, ActivationError> {
        self.activate_with(replica_id, &self.options.default_strategy).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("Unknown replica {0}")]
    UnknownReplica(ReplicaId),

    #[error("Synchronization failed: {0}")]
    Synchronization(#[from] SynchronizationError),

    #[error("Failed to update cluster state: {0}")]
    State(#[from] StateError),
}
