use crate::balancer::Snapshot;
use crate::database::{Replica, ReplicaId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// TargetFactory opens the per-replica handle an invocation runs on.
#[async_trait::async_trait]
pub trait TargetFactory<T: Send + Sync + 'static, E>: Send + Sync {
    async fn open(&self, replica: &Replica) -> Result<T, E>;

    /// Called once the target is no longer in use by the dispatcher.
    async fn close(&self, _replica: &Replica, _target: Arc<T>) {}
}

/// Targets caches one open target per replica.
pub struct Targets<T: Send + Sync + 'static, E> {
    factory: Arc<dyn TargetFactory<T, E>>,
    open: Mutex<BTreeMap<ReplicaId, (Replica, Arc<T>)>>,
}

impl<T, E> Targets<T, E>
where
    T: Send + Sync + 'static,
    E: Send + 'static,
{
    pub fn new(factory: Arc<dyn TargetFactory<T, E>>) -> Self {
        Targets {
            factory,
            open: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn get_or_open(&self, replica: &Replica) -> Result<Arc<T>, E> {
        if let Some(target) = self.existing(replica.id()) {
            return Ok(target);
        }

        let target = Arc::new(self.factory.open(replica).await?);
        let raced = {
            let mut open = self.lock();
            match open.get(replica.id()) {
                // Somebody else opened one meanwhile. Keep theirs.
                Some((_, theirs)) => Some((theirs.clone(), target.clone())),
                None => {
                    open.insert(replica.id().clone(), (replica.clone(), target.clone()));
                    None
                }
            }
        };

        match raced {
            Some((theirs, ours)) => {
                self.factory.close(replica, ours).await;
                Ok(theirs)
            }
            None => Ok(target),
        }
    }

    pub fn existing(&self, replica_id: &ReplicaId) -> Option<Arc<T>> {
        self.lock().get(replica_id).map(|(_, target)| target.clone())
    }

    pub fn existing_ids(&self) -> Vec<ReplicaId> {
        self.lock().keys().cloned().collect()
    }

    pub async fn close(&self, replica_id: &ReplicaId) {
        let removed = self.lock().remove(replica_id);
        if let Some((replica, target)) = removed {
            self.factory.close(&replica, target).await;
        }
    }

    /// Closes the targets of replicas that are no longer active.
    pub async fn close_inactive(&self, active: &Snapshot) {
        let stale: Vec<ReplicaId> = self
            .lock()
            .keys()
            .filter(|id| !active.contains(id))
            .cloned()
            .collect();
        for replica_id in stale {
            self.close(&replica_id).await;
        }
    }

    pub async fn close_all(&self) {
        let all = std::mem::take(&mut *self.lock());
        for (_, (replica, target)) in all {
            self.factory.close(&replica, target).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ReplicaId, (Replica, Arc<T>)>> {
        self.open.lock().expect("Targets mutex guard poison")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::{Balancer, BalancerPolicy};
    use crate::database::ConnectionDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingFactory {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TargetFactory<String, std::io::Error> for CountingFactory {
        async fn open(&self, replica: &Replica) -> Result<String, std::io::Error> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(format!("handle-{}", replica.id()))
        }

        async fn close(&self, _: &Replica, _: Arc<String>) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn replica(id: &str) -> Replica {
        Replica::new(id, ConnectionDescriptor::new("mem://"))
    }

    #[tokio::test]
    async fn opens_once_and_closes_inactive() {
        // -- setup --
        let factory = Arc::new(CountingFactory::default());
        let targets: Targets<String, std::io::Error> = Targets::new(factory.clone());
        let balancer = Balancer::new(BalancerPolicy::Simple);
        balancer.add(replica("db1"));

        // -- execute --
        let first = targets.get_or_open(&replica("db1")).await.unwrap();
        let second = targets.get_or_open(&replica("db1")).await.unwrap();
        targets.get_or_open(&replica("db2")).await.unwrap();
        targets.close_inactive(&balancer.snapshot()).await;

        // -- verify --
        assert_eq!(*first, "handle-db1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        assert_eq!(targets.existing_ids(), vec![ReplicaId::new("db1")]);
    }

    // Every open waits for a second one, so two callers always race.
    struct RacingFactory {
        both_opening: tokio::sync::Barrier,
        counts: CountingFactory,
    }

    #[async_trait::async_trait]
    impl TargetFactory<String, std::io::Error> for RacingFactory {
        async fn open(&self, replica: &Replica) -> Result<String, std::io::Error> {
            self.both_opening.wait().await;
            self.counts.open(replica).await
        }

        async fn close(&self, replica: &Replica, target: Arc<String>) {
            self.counts.close(replica, target).await
        }
    }

    #[tokio::test]
    async fn concurrent_open_keeps_one_target_and_closes_the_other() {
        // -- setup --
        let factory = Arc::new(RacingFactory {
            both_opening: tokio::sync::Barrier::new(2),
            counts: CountingFactory::default(),
        });
        let targets: Targets<String, std::io::Error> = Targets::new(factory.clone());

        // -- execute --
        let (replica_a, replica_b) = (replica("db1"), replica("db1"));
        let (first, second) = tokio::join!(
            targets.get_or_open(&replica_a),
            targets.get_or_open(&replica_b)
        );

        // -- verify --
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
        assert_eq!(factory.counts.opened.load(Ordering::SeqCst), 2);
        assert_eq!(factory.counts.closed.load(Ordering::SeqCst), 1);
        assert_eq!(targets.existing_ids(), vec![ReplicaId::new("db1")]);
    }
}
