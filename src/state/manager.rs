use crate::balancer::Balancer;
use crate::database::{Replica, ReplicaId};
use crate::dispatch::ReplicaDeactivator;
use crate::scheduler::SchedulerGate;
use crate::durability::{
    replicas_to_deactivate, DurabilityError, DurabilityEvent, DurabilityLevel, DurabilityListener, LocalDurabilityLog,
    PendingInvocations,
};
use crate::state::actor::{self, StateActorClient};
use crate::state::membership::{Deactivation, StateCore};
use crate::storage::{PersistentLog, StorageError};
use crate::transport::{Command, GroupTransport, Member, Response, StateCommand};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct StateManagerConfig {
    pub logger: slog::Logger,
    pub replicas: Arc<BTreeMap<ReplicaId, Replica>>,
    pub balancer: Balancer,
    pub log: Arc<dyn PersistentLog>,
    pub transport: Arc<dyn GroupTransport>,
    pub durability_level: DurabilityLevel,
    pub allow_empty: bool,
}

/// StateManager owns cluster membership as this member sees it.
///
/// Local changes are applied first and then broadcast; changes broadcast by others are applied
/// without being forwarded. It also persists this member's durability events and relays them,
/// so that whoever is coordinator when a member dies can recover that member's invocations.
pub struct StateManager {
    logger: slog::Logger,
    balancer: Balancer,
    transport: Arc<dyn GroupTransport>,
    durability_log: LocalDurabilityLog,
    durability_level: DurabilityLevel,
    actor: StateActorClient,
    enabled: AtomicBool,
}

impl StateManager {
    /// Spawns the state actor, so this must run inside a tokio runtime.
    pub fn new(config: StateManagerConfig) -> Self {
        let core = StateCore::new(
            config.logger.clone(),
            config.replicas,
            config.balancer.clone(),
            config.log.clone(),
            config.allow_empty,
        );
        let (client, actor) = actor::create(64, core);
        tokio::spawn(actor.run_event_loop());

        StateManager {
            logger: config.logger,
            balancer: config.balancer,
            transport: config.transport,
            durability_log: LocalDurabilityLog::new(config.log),
            durability_level: config.durability_level,
            actor: client,
            enabled: AtomicBool::new(false),
        }
    }

    pub fn balancer(&self) -> &Balancer {
        &self.balancer
    }

    /// Restores the active set, recovers invocations a crash left behind, then starts serving.
    /// Returns the active set.
    pub async fn start(&self) -> Result<Vec<ReplicaId>, StateError> {
        let local = self.transport.local_member();
        let coordinator = self.transport.coordinator();

        let active = if coordinator == local {
            self.actor.persisted_active().await?
        } else {
            let command = Command::State(StateCommand::ActiveReplicas);
            match self.transport.send(&coordinator, command, None).await {
                Ok(Response::ActiveReplicas(active)) => active,
                other => {
                    slog::warn!(
                        self.logger,
                        "Coordinator {:?} didn't report the active replicas ({:?}), using local state",
                        coordinator,
                        other
                    );
                    self.actor.persisted_active().await?
                }
            }
        };
        self.actor.restore(active).await?;
        slog::info!(self.logger, "Restored active replicas: {:?}", self.balancer.snapshot().ids());

        if self.durability_level == DurabilityLevel::None {
            slog::warn!(
                self.logger,
                "Durability is disabled. Invocations in flight during a crash can't be recovered."
            );
        }
        let pending = self.durability_log.pending()?;
        if !pending.is_empty() {
            slog::warn!(self.logger, "Recovering {} unfinished invocation(s)", pending.len());
        }
        self.recover(pending, true).await?;

        self.enabled.store(true, Ordering::Release);
        Ok(self.balancer.snapshot().ids())
    }

    pub fn stop(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Scheduled maintenance runs on exactly one member: the coordinator, once started.
    pub fn is_scheduler_enabled(&self) -> bool {
        self.is_enabled() && self.transport.coordinator() == self.transport.local_member()
    }

    pub async fn activate(&self, replica_id: &ReplicaId) -> Result<bool, StateError> {
        let changed = self.actor.activate(replica_id.clone()).await?;
        if changed {
            self.broadcast(StateCommand::Activate(replica_id.clone())).await;
        }
        Ok(changed)
    }

    /// Refuses to deactivate the last active replica unless the cluster allows being empty.
    pub async fn deactivate(&self, replica_id: &ReplicaId) -> Result<bool, StateError> {
        let changed = self.actor.deactivate(replica_id.clone(), Deactivation::Guarded).await?;
        if changed {
            self.broadcast(StateCommand::Deactivate(replica_id.clone())).await;
        }
        Ok(changed)
    }

    /// Deactivates on this member only, unconditionally. Used on shutdown for embedded replicas.
    pub async fn deactivate_local(&self, replica_id: &ReplicaId) -> Result<bool, StateError> {
        self.actor.deactivate(replica_id.clone(), Deactivation::Forced).await
    }

    /// Applies a state command from another member.
    pub async fn handle(&self, from: Member, command: StateCommand) -> Response {
        let result = match command {
            StateCommand::Activate(replica_id) => self.actor.activate(replica_id).await.map(|_| Response::Ack),
            StateCommand::Deactivate(replica_id) => self
                .actor
                .deactivate(replica_id, Deactivation::Forced)
                .await
                .map(|_| Response::Ack),
            StateCommand::ActiveReplicas => {
                if !self.is_enabled() {
                    return Response::Rejected("not started".into());
                }
                Ok(Response::ActiveReplicas(self.balancer.snapshot().ids()))
            }
            StateCommand::Durability(event) => {
                self.actor.remote_durability(from, event).await;
                Ok(Response::Ack)
            }
        };

        result.unwrap_or_else(|e| Response::Rejected(e.to_string()))
    }

    /// Recovers the departed member's unfinished invocations, if we are the coordinator.
    pub async fn member_left(&self, member: Member) {
        let pending = self.actor.member_left(member.clone()).await;
        if pending.is_empty() || !self.is_scheduler_enabled() {
            return;
        }

        slog::warn!(
            self.logger,
            "Member {:?} left with {} unfinished invocation(s)",
            member,
            pending.len()
        );
        if let Err(e) = self.recover(pending, false).await {
            slog::error!(self.logger, "Recovery for member {:?} failed: {}", member, e);
        }
    }

    async fn recover(&self, pending: PendingInvocations, clear_local: bool) -> Result<(), StateError> {
        for invocation in pending {
            let doomed = replicas_to_deactivate(self.durability_level, &invocation, &self.balancer.snapshot());
            for replica_id in doomed {
                slog::warn!(
                    self.logger,
                    "Replica {} is out of sync after invocation {} ({:?})",
                    replica_id,
                    invocation.event.transaction_id,
                    invocation.event.phase
                );
                self.deactivate(&replica_id).await?;
            }
            if clear_local {
                self.durability_log.clear(&invocation)?;
            }
        }

        Ok(())
    }

    async fn broadcast(&self, command: StateCommand) {
        let local = self.transport.local_member();
        let responses = self.transport.send_all(Command::State(command), &[local]).await;
        for (member, response) in responses {
            if let Err(e) = response {
                slog::warn!(self.logger, "Failed to notify {:?}: {}", member, e);
            }
        }
    }
}

#[async_trait::async_trait]
impl DurabilityListener for StateManager {
    async fn on_durability_event(&self, event: DurabilityEvent) -> Result<(), DurabilityError> {
        self.durability_log.record(&event)?;
        self.broadcast(StateCommand::Durability(event)).await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReplicaDeactivator for StateManager {
    async fn deactivate(&self, replica_id: &ReplicaId) -> bool {
        match StateManager::deactivate(self, replica_id).await {
            Ok(deactivated) => deactivated,
            Err(e) => {
                slog::error!(self.logger, "Failed to deactivate {}: {}", replica_id, e);
                false
            }
        }
    }
}

impl SchedulerGate for StateManager {
    fn is_scheduler_enabled(&self) -> bool {
        StateManager::is_scheduler_enabled(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Unknown replica {0}")]
    UnknownReplica(ReplicaId),

    #[error("Failed to persist cluster state")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::BalancerPolicy;
    use crate::database::ConnectionDescriptor;
    use crate::durability::{
        ErrorDomain, InvocationEvent, InvokerEvent, InvokerOutcome, Phase, RecordedValue, ResultComparison,
        TransactionId,
    };
    use crate::storage::InMemoryLog;
    use crate::transport::{GroupReceiver, LocalGroup};
    use std::sync::Weak;

    struct StateNode {
        state: StateManager,
    }

    #[async_trait::async_trait]
    impl GroupReceiver for StateNode {
        async fn handle(&self, from: Member, command: Command) -> Response {
            match command {
                Command::State(command) => self.state.handle(from, command).await,
                Command::Lock(_) => Response::Rejected("no locks here".into()),
            }
        }

        async fn member_joined(&self, _: Member) {}

        async fn member_left(&self, member: Member) {
            self.state.member_left(member).await;
        }
    }

    fn replicas() -> Arc<BTreeMap<ReplicaId, Replica>> {
        Arc::new(
            ["db1", "db2", "db3"]
                .iter()
                .map(|id| (ReplicaId::new(*id), Replica::new(*id, ConnectionDescriptor::new("mem://"))))
                .collect(),
        )
    }

    async fn node(group: &LocalGroup, name: &str, log: Arc<dyn PersistentLog>) -> Arc<StateNode> {
        let transport = group.join(name).await;
        let node = Arc::new(StateNode {
            state: StateManager::new(StateManagerConfig {
                logger: slog::Logger::root(slog::Discard, slog::o!()),
                replicas: replicas(),
                balancer: Balancer::new(BalancerPolicy::Simple),
                log,
                transport: transport.clone(),
                durability_level: DurabilityLevel::Fine,
                allow_empty: false,
            }),
        });
        let weak: Weak<dyn GroupReceiver> = Arc::downgrade(&node) as Weak<dyn GroupReceiver>;
        transport.set_receiver(weak);
        node
    }

    fn id(id: &str) -> ReplicaId {
        ReplicaId::new(id)
    }

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

    #[tokio::test]
    async fn joining_member_adopts_coordinator_active_set_and_sees_changes() {
        // -- setup --
        let group = LocalGroup::new();
        let a = node(&group, "a", Arc::new(InMemoryLog::new())).await;
        a.state.start().await.unwrap();
        a.state.activate(&id("db1")).await.unwrap();
        a.state.activate(&id("db2")).await.unwrap();

        // -- execute --
        let b = node(&group, "b", Arc::new(InMemoryLog::new())).await;
        let active = b.state.start().await.unwrap();
        a.state.deactivate(&id("db2")).await.unwrap();

        // -- verify --
        assert_eq!(active, vec![id("db1"), id("db2")]);
        assert_eq!(b.state.balancer().snapshot().ids(), vec![id("db1")]);
        assert!(a.state.is_scheduler_enabled());
        assert!(!b.state.is_scheduler_enabled());
    }

    #[tokio::test]
    async fn restart_recovers_locally_logged_invocation() {
        // -- setup --
        // A previous run crashed after db1 answered and before db2 did.
        let log: Arc<dyn PersistentLog> = Arc::new(InMemoryLog::new());
        let previous = LocalDurabilityLog::new(log.clone());
        let tx = TransactionId::random();
        previous.record(&DurabilityEvent::BeforeInvocation(invocation(&tx))).unwrap();
        previous
            .record(&DurabilityEvent::AfterInvoker(invoker(
                &tx,
                "db1",
                InvokerOutcome::Success(RecordedValue::of(&42)),
            )))
            .unwrap();
        previous
            .record(&DurabilityEvent::BeforeInvoker(invoker(&tx, "db2", InvokerOutcome::Pending)))
            .unwrap();
        let mut batch = crate::storage::WriteBatch::new();
        batch
            .put(crate::storage::Keyspace::ActiveReplicas, b"db1".to_vec(), vec![])
            .put(crate::storage::Keyspace::ActiveReplicas, b"db2".to_vec(), vec![]);
        log.apply(batch).unwrap();

        // -- execute --
        let group = LocalGroup::new();
        let a = node(&group, "a", log.clone()).await;
        let active = a.state.start().await.unwrap();

        // -- verify --
        assert_eq!(active, vec![id("db1")]);
        assert!(previous.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn coordinator_recovers_for_departed_member() {
        // -- setup --
        let group = LocalGroup::new();
        let a = node(&group, "a", Arc::new(InMemoryLog::new())).await;
        a.state.start().await.unwrap();
        a.state.activate(&id("db1")).await.unwrap();
        a.state.activate(&id("db2")).await.unwrap();
        a.state.activate(&id("db3")).await.unwrap();
        let b = node(&group, "b", Arc::new(InMemoryLog::new())).await;
        b.state.start().await.unwrap();

        // -- execute --
        // b dispatches to all three, only db1 and db3 answer the same, then b dies.
        let tx = TransactionId::random();
        let ok = || InvokerOutcome::Success(RecordedValue::of(&1));
        for event in vec![
            DurabilityEvent::BeforeInvocation(invocation(&tx)),
            DurabilityEvent::AfterInvoker(invoker(&tx, "db1", ok())),
            DurabilityEvent::AfterInvoker(invoker(&tx, "db2", InvokerOutcome::Pending)),
            DurabilityEvent::AfterInvoker(invoker(&tx, "db3", ok())),
        ] {
            b.state.on_durability_event(event).await.unwrap();
        }
        group.leave(&Member::new("b")).await;

        // -- verify --
        assert_eq!(a.state.balancer().snapshot().ids(), vec![id("db1"), id("db3")]);
    }

    #[tokio::test]
    async fn non_coordinator_leaves_recovery_to_coordinator() {
        let group = LocalGroup::new();
        let a = node(&group, "a", Arc::new(InMemoryLog::new())).await;
        a.state.start().await.unwrap();
        a.state.activate(&id("db1")).await.unwrap();
        a.state.activate(&id("db2")).await.unwrap();
        let b = node(&group, "b", Arc::new(InMemoryLog::new())).await;
        b.state.start().await.unwrap();
        let c = node(&group, "c", Arc::new(InMemoryLog::new())).await;
        c.state.start().await.unwrap();

        // c dies mid-invocation; only a (coordinator) acts, and b learns from a's broadcast.
        let tx = TransactionId::random();
        c.state
            .on_durability_event(DurabilityEvent::BeforeInvocation(invocation(&tx)))
            .await
            .unwrap();
        c.state
            .on_durability_event(DurabilityEvent::AfterInvoker(invoker(
                &tx,
                "db1",
                InvokerOutcome::Success(RecordedValue::of(&1)),
            )))
            .await
            .unwrap();
        group.leave(&Member::new("c")).await;

        assert_eq!(a.state.balancer().snapshot().ids(), vec![id("db1")]);
        assert_eq!(b.state.balancer().snapshot().ids(), vec![id("db1")]);
    }
}
