use crate::balancer::Balancer;
use crate::database::{Replica, ReplicaId};
use crate::durability::{DurabilityEvent, PendingInvocations};
use crate::state::StateError;
use crate::storage::{Keyspace, PersistentLog, WriteBatch};
use crate::transport::Member;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Whether a deactivation may leave the cluster without any active replica.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Deactivation {
    /// Refused if the replica is the last active one (unless the cluster allows being empty).
    Guarded,
    /// Always applied.
    Forced,
}

/// StateCore is the membership state a member owns: the active set (in the balancer and in the
/// persistent log) and its views of other members' in-flight invocations. Only the state actor
/// touches it, so nothing here is async or locked.
pub(super) struct StateCore {
    logger: slog::Logger,
    replicas: Arc<BTreeMap<ReplicaId, Replica>>,
    balancer: Balancer,
    log: Arc<dyn PersistentLog>,
    allow_empty: bool,
    remote_invocations: HashMap<Member, PendingInvocations>,
}

impl StateCore {
    pub fn new(
        logger: slog::Logger,
        replicas: Arc<BTreeMap<ReplicaId, Replica>>,
        balancer: Balancer,
        log: Arc<dyn PersistentLog>,
        allow_empty: bool,
    ) -> Self {
        StateCore {
            logger,
            replicas,
            balancer,
            log,
            allow_empty,
            remote_invocations: HashMap::new(),
        }
    }

    pub fn activate(&mut self, replica_id: &ReplicaId) -> Result<bool, StateError> {
        let replica = self.replica(replica_id)?.clone();
        self.log.put(Keyspace::ActiveReplicas, key(replica_id), vec![])?;

        let changed = self.balancer.add(replica);
        if changed {
            slog::info!(self.logger, "Activated replica {}", replica_id);
        }
        Ok(changed)
    }

    pub fn deactivate(&mut self, replica_id: &ReplicaId, mode: Deactivation) -> Result<bool, StateError> {
        self.replica(replica_id)?;
        if !self.balancer.contains(replica_id) {
            return Ok(false);
        }
        if mode == Deactivation::Guarded && !self.allow_empty && self.balancer.len() == 1 {
            slog::warn!(
                self.logger,
                "Not deactivating {} since it is the last active replica",
                replica_id
            );
            return Ok(false);
        }

        self.log.delete(Keyspace::ActiveReplicas, key(replica_id))?;
        let changed = self.balancer.remove(replica_id);
        if changed {
            slog::warn!(self.logger, "Deactivated replica {}", replica_id);
        }
        Ok(changed)
    }

    /// Replaces the active set, e.g. with the one the coordinator reports at startup. Unknown
    /// ids are skipped; a member may be configured with fewer replicas than its peers.
    pub fn restore(&mut self, active: Vec<ReplicaId>) -> Result<(), StateError> {
        let mut batch = WriteBatch::new();
        batch.delete_prefix(Keyspace::ActiveReplicas, vec![]);

        let mut known = Vec::new();
        for replica_id in active {
            match self.replicas.get(&replica_id) {
                Some(replica) => {
                    batch.put(Keyspace::ActiveReplicas, key(&replica_id), vec![]);
                    known.push(replica.clone());
                }
                None => slog::warn!(self.logger, "Ignoring unknown active replica {}", replica_id),
            }
        }
        self.log.apply(batch)?;

        for replica_id in self.balancer.snapshot().ids() {
            if !known.iter().any(|r| r.id() == &replica_id) {
                self.balancer.remove(&replica_id);
            }
        }
        for replica in known {
            self.balancer.add(replica);
        }

        Ok(())
    }

    /// The active set as persisted by the last run.
    pub fn persisted_active(&self) -> Result<Vec<ReplicaId>, StateError> {
        let mut active = Vec::new();
        for (k, _) in self.log.scan(Keyspace::ActiveReplicas)? {
            match String::from_utf8(k) {
                Ok(id) => active.push(ReplicaId::new(id)),
                Err(_) => slog::warn!(self.logger, "Skipping non-utf8 active replica record"),
            }
        }
        Ok(active)
    }

    pub fn remote_durability(&mut self, member: Member, event: &DurabilityEvent) {
        self.remote_invocations.entry(member).or_default().apply(event);
    }

    /// Forgets the member, handing back what it had in flight.
    pub fn member_left(&mut self, member: &Member) -> PendingInvocations {
        self.remote_invocations.remove(member).unwrap_or_default()
    }

    fn replica(&self, replica_id: &ReplicaId) -> Result<&Replica, StateError> {
        self.replicas
            .get(replica_id)
            .ok_or_else(|| StateError::UnknownReplica(replica_id.clone()))
    }
}

fn key(replica_id: &ReplicaId) -> Vec<u8> {
    replica_id.as_str().as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::BalancerPolicy;
    use crate::database::ConnectionDescriptor;
    use crate::durability::{ErrorDomain, InvocationEvent, Phase, ResultComparison, TransactionId};
    use crate::storage::InMemoryLog;

    fn core(allow_empty: bool) -> (StateCore, Balancer, Arc<InMemoryLog>) {
        let replicas: BTreeMap<ReplicaId, Replica> = ["db1", "db2"]
            .iter()
            .map(|id| (ReplicaId::new(*id), Replica::new(*id, ConnectionDescriptor::new("mem://"))))
            .collect();
        let balancer = Balancer::new(BalancerPolicy::Simple);
        let log = Arc::new(InMemoryLog::new());
        let core = StateCore::new(
            slog::Logger::root(slog::Discard, slog::o!()),
            Arc::new(replicas),
            balancer.clone(),
            log.clone(),
            allow_empty,
        );
        (core, balancer, log)
    }

    fn id(id: &str) -> ReplicaId {
        ReplicaId::new(id)
    }

    #[test]
    fn activation_is_persisted_and_idempotent() {
        // -- setup --
        let (mut core, balancer, _) = core(false);

        // -- execute --
        let first = core.activate(&id("db2")).unwrap();
        let second = core.activate(&id("db2")).unwrap();

        // -- verify --
        assert!(first);
        assert!(!second);
        assert!(balancer.contains(&id("db2")));
        assert_eq!(core.persisted_active().unwrap(), vec![id("db2")]);
    }

    #[test]
    fn guarded_deactivation_keeps_last_replica() {
        let (mut core, balancer, _) = core(false);
        core.activate(&id("db1")).unwrap();
        core.activate(&id("db2")).unwrap();

        assert!(core.deactivate(&id("db1"), Deactivation::Guarded).unwrap());
        assert!(!core.deactivate(&id("db2"), Deactivation::Guarded).unwrap());
        assert_eq!(balancer.len(), 1);

        assert!(core.deactivate(&id("db2"), Deactivation::Forced).unwrap());
        assert!(balancer.is_empty());
        assert!(core.persisted_active().unwrap().is_empty());
    }

    #[test]
    fn empty_allowed_lets_last_replica_go() {
        let (mut core, balancer, _) = core(true);
        core.activate(&id("db1")).unwrap();

        assert!(core.deactivate(&id("db1"), Deactivation::Guarded).unwrap());
        assert!(balancer.is_empty());
    }

    #[test]
    fn unknown_replica_is_an_error() {
        let (mut core, _, _) = core(false);
        assert!(matches!(
            core.activate(&id("nope")),
            Err(StateError::UnknownReplica(_))
        ));
    }

    #[test]
    fn restore_replaces_active_set() {
        let (mut core, balancer, _) = core(false);
        core.activate(&id("db1")).unwrap();

        core.restore(vec![id("db2"), id("db9")]).unwrap();

        assert_eq!(balancer.snapshot().ids(), vec![id("db2")]);
        assert_eq!(core.persisted_active().unwrap(), vec![id("db2")]);
    }

    #[test]
    fn departed_member_view_is_handed_back_once() {
        let (mut core, _, _) = core(false);
        let member = Member::new("b");
        let event = DurabilityEvent::BeforeInvocation(InvocationEvent {
            transaction_id: TransactionId::random(),
            phase: Phase::Commit,
            error_domain: ErrorDomain::Sql,
            comparison: ResultComparison::Compare,
        });

        core.remote_durability(member.clone(), &event);

        assert_eq!(core.member_left(&member).len(), 1);
        assert!(core.member_left(&member).is_empty());
    }
}
