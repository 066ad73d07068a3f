use crate::lock::DistributedLockManager;
use crate::state::StateManager;
use crate::transport::{Command, GroupReceiver, Member, Response};
use std::sync::Arc;

/// ClusterNode routes what the group delivers to this member.
pub(super) struct ClusterNode {
    logger: slog::Logger,
    locks: Arc<DistributedLockManager>,
    state: Arc<StateManager>,
}

impl ClusterNode {
    pub fn new(logger: slog::Logger, locks: Arc<DistributedLockManager>, state: Arc<StateManager>) -> Self {
        ClusterNode { logger, locks, state }
    }
}

#[async_trait::async_trait]
impl GroupReceiver for ClusterNode {
    async fn handle(&self, from: Member, command: Command) -> Response {
        slog::debug!(self.logger, "Received {:?} from {}", command, from);
        match command {
            Command::Lock(command) => self.locks.handle(command).await,
            Command::State(command) => self.state.handle(from, command).await,
        }
    }

    /// New members pull the active replica set from the coordinator when they start.
    async fn member_joined(&self, member: Member) {
        slog::info!(self.logger, "Member {} joined", member);
    }

    async fn member_left(&self, member: Member) {
        slog::info!(self.logger, "Member {} left", member);
        self.locks.member_left(&member);
        self.state.member_left(member).await;
    }
}
