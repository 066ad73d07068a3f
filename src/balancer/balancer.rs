use crate::database::{Replica, ReplicaId};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// How `Balancer::next()` picks among the active replicas.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BalancerPolicy {
    /// Cycles through the active replicas in replica order.
    RoundRobin,
    /// Picks a replica with probability weight / sum(weights).
    Random,
    /// Always the primary.
    Simple,
    /// The replica with the fewest in-flight invocations relative to its weight.
    Load,
}

/// Balancer holds the set of active replicas.
///
/// Membership is an immutable `Snapshot` that gets swapped on every change, so readers (the
/// dispatchers) never block on writers and an iteration in progress keeps seeing the membership
/// it started with. Cloning a Balancer is cheap and every clone sees the same membership.
#[derive(Clone)]
pub struct Balancer {
    inner: Arc<Inner>,
}

struct Inner {
    policy: BalancerPolicy,
    snapshot: watch::Sender<Arc<Snapshot>>,
    cursor: AtomicUsize,
}

/// Snapshot is one version of the active replica set, ordered by replica id.
#[derive(Default)]
pub struct Snapshot {
    slots: Vec<Arc<Slot>>,
    // Each slot repeated `weight` times. Only maintained for the random policy.
    weighted: Vec<Arc<Slot>>,
}

struct Slot {
    replica: Replica,
    load: Arc<AtomicUsize>,
}

impl Balancer {
    pub fn new(policy: BalancerPolicy) -> Self {
        let (tx, _) = watch::channel(Arc::new(Snapshot::default()));
        Balancer {
            inner: Arc::new(Inner {
                policy,
                snapshot: tx,
                cursor: AtomicUsize::new(0),
            }),
        }
    }

    pub fn policy(&self) -> BalancerPolicy {
        self.inner.policy
    }

    /// Returns true if membership changed, i.e. the replica wasn't already active.
    pub fn add(&self, replica: Replica) -> bool {
        let policy = self.inner.policy;
        self.inner.snapshot.send_if_modified(|current| match current.with(replica, policy) {
            Some(next) => {
                *current = Arc::new(next);
                true
            }
            None => false,
        })
    }

    /// Returns true if membership changed, i.e. the replica was active.
    pub fn remove(&self, replica_id: &ReplicaId) -> bool {
        self.inner
            .snapshot
            .send_if_modified(|current| match current.without(replica_id) {
                Some(next) => {
                    *current = Arc::new(next);
                    true
                }
                None => false,
            })
    }

    pub fn contains(&self, replica_id: &ReplicaId) -> bool {
        self.snapshot().contains(replica_id)
    }

    /// The reference replica for consistency checks: the active replica with the lowest id.
    pub fn primary(&self) -> Option<Replica> {
        self.snapshot().primary().cloned()
    }

    /// Selects an active replica according to the policy. Falls back to `primary()` when the
    /// policy can't choose, so `None` always means the cluster has no active replica.
    pub fn next(&self) -> Option<Replica> {
        let snapshot = self.snapshot();
        let selected = match self.inner.policy {
            BalancerPolicy::Simple => None,
            BalancerPolicy::RoundRobin => {
                if snapshot.slots.is_empty() {
                    None
                } else {
                    let i = self.inner.cursor.fetch_add(1, Ordering::Relaxed) % snapshot.slots.len();
                    Some(&snapshot.slots[i])
                }
            }
            BalancerPolicy::Random => {
                if snapshot.weighted.is_empty() {
                    None
                } else {
                    let i = rand::thread_rng().gen_range(0..snapshot.weighted.len());
                    Some(&snapshot.weighted[i])
                }
            }
            BalancerPolicy::Load => snapshot.slots.iter().min_by(|a, b| {
                // load_a / weight_a vs load_b / weight_b without dividing.
                let left = a.load.load(Ordering::Relaxed) as u64 * b.weight();
                let right = b.load.load(Ordering::Relaxed) as u64 * a.weight();
                left.cmp(&right)
            }),
        };

        selected
            .map(|slot| slot.replica.clone())
            .or_else(|| snapshot.primary().cloned())
    }

    /// Current membership. The returned snapshot never changes; take a new one to observe
    /// later activations/deactivations.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn replicas(&self) -> Vec<Replica> {
        self.snapshot().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Receives a new snapshot on every membership change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.inner.snapshot.subscribe()
    }

    /// Counts an invocation against `replica_id` until the guard is dropped. Feeds the load
    /// policy; harmless under the others.
    pub fn begin(&self, replica_id: &ReplicaId) -> LoadGuard {
        let load = self
            .snapshot()
            .slot(replica_id)
            .map(|slot| slot.load.clone());
        if let Some(load) = &load {
            load.fetch_add(1, Ordering::Relaxed);
        }

        LoadGuard { load }
    }
}

impl Snapshot {
    pub fn iter(&self) -> impl Iterator<Item = &Replica> {
        self.slots.iter().map(|slot| &slot.replica)
    }

    pub fn primary(&self) -> Option<&Replica> {
        self.slots.first().map(|slot| &slot.replica)
    }

    pub fn contains(&self, replica_id: &ReplicaId) -> bool {
        self.slot(replica_id).is_some()
    }

    pub fn get(&self, replica_id: &ReplicaId) -> Option<&Replica> {
        self.slot(replica_id).map(|slot| &slot.replica)
    }

    pub fn ids(&self) -> Vec<ReplicaId> {
        self.iter().map(|r| r.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, replica_id: &ReplicaId) -> Option<&Arc<Slot>> {
        self.position(replica_id).ok().map(|i| &self.slots[i])
    }

    fn position(&self, replica_id: &ReplicaId) -> Result<usize, usize> {
        self.slots.binary_search_by(|slot| slot.replica.id().cmp(replica_id))
    }

    // Copy-on-write add. The weighted list is extended rather than rebuilt.
    fn with(&self, replica: Replica, policy: BalancerPolicy) -> Option<Snapshot> {
        let insert_at = match self.position(replica.id()) {
            Ok(_) => return None,
            Err(i) => i,
        };

        let slot = Arc::new(Slot {
            replica,
            load: Arc::new(AtomicUsize::new(0)),
        });

        let mut slots = self.slots.clone();
        slots.insert(insert_at, slot.clone());

        let mut weighted = self.weighted.clone();
        if policy == BalancerPolicy::Random {
            let copies = slot.weight() as usize;
            weighted.extend(std::iter::repeat(slot).take(copies));
        }

        Some(Snapshot { slots, weighted })
    }

    fn without(&self, replica_id: &ReplicaId) -> Option<Snapshot> {
        let remove_at = self.position(replica_id).ok()?;

        let mut slots = self.slots.clone();
        slots.remove(remove_at);

        let mut weighted = self.weighted.clone();
        weighted.retain(|slot| slot.replica.id() != replica_id);

        Some(Snapshot { slots, weighted })
    }
}

impl Slot {
    fn weight(&self) -> u64 {
        self.replica.weight().max(1) as u64
    }
}

/// LoadGuard marks one in-flight invocation against a replica.
pub struct LoadGuard {
    load: Option<Arc<AtomicUsize>>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if let Some(load) = &self.load {
            load.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
