use crate::balancer::Balancer;
use crate::cluster::cluster::{ClusterInner, DatabaseCluster};
use crate::cluster::node::ClusterNode;
use crate::cluster::options::ClusterOptionsValidated;
use crate::cluster::ClusterOptions;
use crate::database::{ConnectionFactory, Replica, ReplicaId};
use crate::lock::{DistributedLockManager, LocalLockManager};
use crate::scheduler::{Scheduler, SchedulerGate};
use crate::state::{StateManager, StateManagerConfig};
use crate::storage::{StorageConfig, StorageError};
use crate::sync::{DifferentialStrategy, FullStrategy, PassiveStrategy, SynchronizationStrategy};
use crate::transport::{GroupReceiver, GroupTransport};
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::sync::Arc;

pub struct ClusterConfig {
    pub cluster_id: String,
    pub replicas: Vec<Replica>,
    pub storage: StorageConfig,
    pub transport: Arc<dyn GroupTransport>,
    pub connections: Arc<dyn ConnectionFactory>,
    // In addition to "passive", "full" and "differential". A strategy with the id of a
    // built-in one replaces it.
    pub strategies: Vec<Arc<dyn SynchronizationStrategy>>,
    pub info_logger: slog::Logger,
    pub options: ClusterOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterCreationError {
    #[error("Illegal options for configuring cluster: {0}")]
    IllegalOptions(String),
    #[error("Invalid replicas: {0}")]
    InvalidReplicas(String),
    #[error("Unknown synchronization strategy {0}")]
    UnknownStrategy(String),
    #[error("State storage initialization failure")]
    Storage(#[from] StorageError),
}

/// Wires up this member of the cluster. The cluster does nothing until `start()`.
///
/// Must run inside a tokio runtime.
pub async fn try_create_cluster(config: ClusterConfig) -> Result<DatabaseCluster, ClusterCreationError> {
    let root_logger = config
        .info_logger
        .new(slog::o!("Cluster" => config.cluster_id.clone()));

    let options = ClusterOptionsValidated::try_from(config.options)
        .map_err(|e| ClusterCreationError::IllegalOptions(e.to_string()))?;

    let replicas = Arc::new(validate_replicas(config.replicas)?);
    let strategies = strategies(&options, config.strategies)?;
    let log = config.storage.open()?;

    let balancer = Balancer::new(options.balancer);
    let locks = Arc::new(DistributedLockManager::new(
        root_logger.new(slog::o!("Component" => "Locks")),
        Arc::new(LocalLockManager::new()),
        config.transport.clone(),
        options.lock_options(),
    ));
    let state = Arc::new(StateManager::new(StateManagerConfig {
        logger: root_logger.new(slog::o!("Component" => "State")),
        replicas: replicas.clone(),
        balancer: balancer.clone(),
        log,
        transport: config.transport.clone(),
        durability_level: options.durability,
        allow_empty: options.allow_empty_cluster,
    }));

    let node = Arc::new(ClusterNode::new(
        root_logger.new(slog::o!("Member" => config.transport.local_member().to_string())),
        locks.clone(),
        state.clone(),
    ));
    let receiver: Arc<dyn GroupReceiver> = node.clone();
    config.transport.set_receiver(Arc::downgrade(&receiver));

    let gate: Arc<dyn SchedulerGate> = state.clone();
    let scheduler = Scheduler::new(root_logger.new(slog::o!("Component" => "Scheduler")), gate);

    Ok(DatabaseCluster::new(ClusterInner {
        id: config.cluster_id,
        logger: root_logger,
        replicas,
        balancer,
        state,
        locks,
        connections: config.connections,
        strategies,
        scheduler,
        options,
        _node: node,
    }))
}

fn validate_replicas(replicas: Vec<Replica>) -> Result<BTreeMap<ReplicaId, Replica>, ClusterCreationError> {
    if replicas.is_empty() {
        return Err(ClusterCreationError::InvalidReplicas("no replicas".into()));
    }

    let mut by_id = BTreeMap::new();
    for replica in replicas {
        if replica.weight() == 0 {
            return Err(ClusterCreationError::InvalidReplicas(format!(
                "replica {} has zero weight",
                replica.id()
            )));
        }
        let replica_id = replica.id().clone();
        if by_id.insert(replica_id.clone(), replica).is_some() {
            return Err(ClusterCreationError::InvalidReplicas(format!(
                "duplicate replica {}",
                replica_id
            )));
        }
    }

    Ok(by_id)
}

fn strategies(
    options: &ClusterOptionsValidated,
    extra: Vec<Arc<dyn SynchronizationStrategy>>,
) -> Result<BTreeMap<String, Arc<dyn SynchronizationStrategy>>, ClusterCreationError> {
    let built_in: Vec<Arc<dyn SynchronizationStrategy>> = vec![
        Arc::new(PassiveStrategy),
        Arc::new(FullStrategy),
        Arc::new(DifferentialStrategy),
    ];

    let by_id: BTreeMap<String, Arc<dyn SynchronizationStrategy>> = built_in
        .into_iter()
        .chain(extra)
        .map(|strategy| (strategy.id().to_string(), strategy))
        .collect();

    if !by_id.contains_key(&options.default_strategy) {
        return Err(ClusterCreationError::UnknownStrategy(options.default_strategy.clone()));
    }
    Ok(by_id)
}
