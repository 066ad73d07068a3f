use crate::cluster::ActivationError;
use crate::database::ReplicaId;
use crate::scheduler::ScheduledTask;
use std::sync::Weak;

/// What auto-activation needs from the cluster.
#[async_trait::async_trait]
pub trait ReplicaActivator: Send + Sync {
    fn inactive_replicas(&self) -> Vec<ReplicaId>;

    /// Synchronizes the replica with the default strategy and activates it.
    async fn activate(&self, replica_id: &ReplicaId) -> Result<bool, ActivationError>;
}

/// Tries to bring every inactive replica back. A replica that can't be synchronized stays
/// inactive until the next run.
pub struct AutoActivationTask {
    logger: slog::Logger,
    activator: Weak<dyn ReplicaActivator>,
}

impl AutoActivationTask {
    pub fn new(logger: slog::Logger, activator: Weak<dyn ReplicaActivator>) -> Self {
        AutoActivationTask { logger, activator }
    }
}

#[async_trait::async_trait]
impl ScheduledTask for AutoActivationTask {
    fn name(&self) -> &'static str {
        "auto-activation"
    }

    async fn run(&self) {
        let activator = match self.activator.upgrade() {
            Some(activator) => activator,
            None => return,
        };

        for replica_id in activator.inactive_replicas() {
            match activator.activate(&replica_id).await {
                Ok(true) => slog::info!(self.logger, "Reactivated {}", replica_id),
                Ok(false) => {}
                Err(e) => slog::warn!(self.logger, "Failed to reactivate {}: {}", replica_id, e),
            }
        }
    }
}
