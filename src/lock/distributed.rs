use crate::lock::backoff::Backoff;
use crate::lock::{LocalLockGuard, LocalLockManager, LockDescriptor, LockType};
use crate::transport::{Command, GroupTransport, LockCommand, Member, Response, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

pub struct LockOptions {
    /// How long the coordinator waits for its local lock on a remote member's behalf.
    pub coordinator_timeout: Duration,
    pub backoff: Vec<Duration>,
}

/// DistributedLockManager provides cluster-wide write locks through the coordinator: a write
/// lock is held once every member, coordinator first, holds the same local lock on the
/// requester's behalf. Read locks never leave the process.
///
/// Any partial acquisition is rolled back in full before retrying, so a coordinator change in
/// the middle of an attempt costs one retry and nothing else.
pub struct DistributedLockManager {
    logger: slog::Logger,
    local: Arc<LocalLockManager>,
    transport: Arc<dyn GroupTransport>,
    options: LockOptions,
    // Local locks held on behalf of members (including the local member, when it isn't the
    // coordinator).
    remote_locks: Mutex<HashMap<LockDescriptor, LocalLockGuard>>,
}

impl DistributedLockManager {
    pub fn new(
        logger: slog::Logger,
        local: Arc<LocalLockManager>,
        transport: Arc<dyn GroupTransport>,
        options: LockOptions,
    ) -> Self {
        DistributedLockManager {
            logger,
            local,
            transport,
            options,
            remote_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn local(&self) -> &Arc<LocalLockManager> {
        &self.local
    }

    /// Local read lock. Topology changes take the distributed write lock, which needs this
    /// member's local write lock, so holding this keeps them out.
    pub async fn read_lock(&self, id: Option<&str>) -> LocalLockGuard {
        self.local.lock(id, LockType::Read).await
    }

    /// Retries until acquired. Cancel by dropping the future.
    pub async fn write_lock(&self, id: Option<&str>) -> DistributedLockGuard {
        let mut backoff = Backoff::new(&self.options.backoff);
        loop {
            if let Some(guard) = self.try_write_lock(id).await {
                return guard;
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }

    /// A single acquisition attempt.
    pub async fn try_write_lock(&self, id: Option<&str>) -> Option<DistributedLockGuard> {
        let descriptor = LockDescriptor::write(id, self.transport.local_member());
        let coordinator = self.transport.coordinator();

        let result = if coordinator == descriptor.member {
            self.acquire_as_coordinator(&descriptor).await
        } else {
            self.acquire_through_coordinator(&descriptor, &coordinator).await
        };

        match result {
            Ok(local_guard) => Some(DistributedLockGuard {
                transport: self.transport.clone(),
                descriptor,
                local: local_guard,
                released: false,
            }),
            Err(refused_by) => {
                slog::debug!(self.logger, "Write lock {:?} refused by {:?}", descriptor.id, refused_by);
                None
            }
        }
    }

    /// Retries until acquired or until `timeout` elapses.
    pub async fn try_write_lock_for(&self, id: Option<&str>, timeout: Duration) -> Result<DistributedLockGuard, LockError> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new(&self.options.backoff);
        loop {
            if let Some(guard) = self.try_write_lock(id).await {
                return Ok(guard);
            }
            let delay = backoff.next_delay();
            if Instant::now() + delay >= deadline {
                return Err(LockError::TimedOut {
                    id: id.map(str::to_string),
                    timeout,
                });
            }
            tokio::time::sleep(delay).await;
        }
    }

    // Ok(Some(guard)): the local lock we hold as coordinator.
    async fn acquire_as_coordinator(&self, descriptor: &LockDescriptor) -> Result<Option<LocalLockGuard>, Member> {
        let guard = self
            .local
            .try_lock(descriptor.id.as_deref(), LockType::Write)
            .ok_or_else(|| descriptor.member.clone())?;

        let acquire = Command::Lock(LockCommand::Acquire {
            descriptor: descriptor.clone(),
        });
        let responses = self.transport.send_all(acquire, &[descriptor.member.clone()]).await;
        if let Err(refused_by) = self.all_accepted(descriptor, responses).await {
            drop(guard);
            return Err(refused_by);
        }

        Ok(Some(guard))
    }

    async fn acquire_through_coordinator(
        &self,
        descriptor: &LockDescriptor,
        coordinator: &Member,
    ) -> Result<Option<LocalLockGuard>, Member> {
        let timeout = self.options.coordinator_timeout;
        let acquire = Command::Lock(LockCommand::AcquireCoordinator {
            descriptor: descriptor.clone(),
            timeout,
        });
        // The coordinator may still grant after we gave up waiting; a release covers that.
        match self.transport.send(coordinator, acquire, Some(timeout * 2)).await {
            Ok(Response::Locked(true)) => {}
            Ok(_) => return Err(coordinator.clone()),
            Err(e) => {
                if let TransportError::TimedOut(_) = e {
                    self.release_on(descriptor, std::slice::from_ref(coordinator)).await;
                }
                return Err(coordinator.clone());
            }
        }

        let acquire = Command::Lock(LockCommand::Acquire {
            descriptor: descriptor.clone(),
        });
        let responses = self.transport.send_all(acquire, &[coordinator.clone()]).await;
        if let Err(refused_by) = self.all_accepted(descriptor, responses).await {
            self.release_on(descriptor, std::slice::from_ref(coordinator)).await;
            return Err(refused_by);
        }

        Ok(None)
    }

    // If anyone refused, releases the lock on those who accepted and returns the first refuser.
    async fn all_accepted(
        &self,
        descriptor: &LockDescriptor,
        responses: Vec<(Member, Result<Response, TransportError>)>,
    ) -> Result<(), Member> {
        let mut accepted = Vec::new();
        let mut refused_by = None;
        for (member, response) in responses {
            match response {
                Ok(Response::Locked(true)) => accepted.push(member),
                _ => {
                    refused_by.get_or_insert(member);
                }
            }
        }

        match refused_by {
            None => Ok(()),
            Some(member) => {
                self.release_on(descriptor, &accepted).await;
                Err(member)
            }
        }
    }

    async fn release_on(&self, descriptor: &LockDescriptor, members: &[Member]) {
        for member in members {
            let release = Command::Lock(LockCommand::Release {
                descriptor: descriptor.clone(),
            });
            if let Err(e) = self.transport.send(member, release, None).await {
                slog::warn!(self.logger, "Failed to release lock on {:?}: {}", member, e);
            }
        }
    }

    /// Serves a lock command sent by another member (or by ourselves).
    pub async fn handle(&self, command: LockCommand) -> Response {
        match command {
            LockCommand::AcquireCoordinator { descriptor, timeout } => {
                if self.holds_for(&descriptor) {
                    return Response::Locked(true);
                }
                let guard = self
                    .local
                    .lock_timeout(descriptor.id.as_deref(), descriptor.lock_type, timeout)
                    .await;
                Response::Locked(self.hold_for(descriptor, guard))
            }
            LockCommand::Acquire { descriptor } => {
                if self.holds_for(&descriptor) {
                    return Response::Locked(true);
                }
                let guard = self.local.try_lock(descriptor.id.as_deref(), descriptor.lock_type);
                Response::Locked(self.hold_for(descriptor, guard))
            }
            LockCommand::Release { descriptor } => {
                // Dropping the guard releases the local lock.
                let _ = self.remote_locks().remove(&descriptor);
                Response::Ack
            }
        }
    }

    /// Releases every lock held on behalf of a member that left the group.
    pub fn member_left(&self, member: &Member) {
        let mut remote_locks = self.remote_locks();
        let before = remote_locks.len();
        remote_locks.retain(|descriptor, _| &descriptor.member != member);
        if remote_locks.len() != before {
            slog::info!(
                self.logger,
                "Released {} lock(s) held by departed member {:?}",
                before - remote_locks.len(),
                member
            );
        }
    }

    fn holds_for(&self, descriptor: &LockDescriptor) -> bool {
        self.remote_locks().contains_key(descriptor)
    }

    fn hold_for(&self, descriptor: LockDescriptor, guard: Option<LocalLockGuard>) -> bool {
        match guard {
            Some(guard) => {
                self.remote_locks().insert(descriptor, guard);
                true
            }
            None => false,
        }
    }

    fn remote_locks(&self) -> std::sync::MutexGuard<'_, HashMap<LockDescriptor, LocalLockGuard>> {
        self.remote_locks.lock().expect("DistributedLockManager mutex guard poison")
    }
}

/// DistributedLockGuard holds a cluster-wide write lock. Prefer `unlock()`; dropping the guard
/// releases the lock in the background.
pub struct DistributedLockGuard {
    transport: Arc<dyn GroupTransport>,
    descriptor: LockDescriptor,
    local: Option<LocalLockGuard>,
    released: bool,
}

impl DistributedLockGuard {
    pub fn descriptor(&self) -> &LockDescriptor {
        &self.descriptor
    }

    pub async fn unlock(mut self) {
        self.released = true;
        release(self.transport.clone(), self.descriptor.clone(), self.local.take()).await;
    }
}

async fn release(transport: Arc<dyn GroupTransport>, descriptor: LockDescriptor, local: Option<LocalLockGuard>) {
    let command = Command::Lock(LockCommand::Release { descriptor });
    // Members that can't be reached have left, and leaving releases their locks.
    let _ = transport.send_all(command, &[]).await;
    drop(local);
}

impl Drop for DistributedLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(release(self.transport.clone(), self.descriptor.clone(), self.local.take()));
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Timed out after {timeout:?} acquiring write lock {id:?}")]
    TimedOut { id: Option<String>, timeout: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{GroupReceiver, LocalGroup, LocalTransport};
    use std::sync::Weak;

    struct LockNode {
        locks: DistributedLockManager,
    }

    #[async_trait::async_trait]
    impl GroupReceiver for LockNode {
        async fn handle(&self, _: Member, command: Command) -> Response {
            match command {
                Command::Lock(command) => self.locks.handle(command).await,
                Command::State(_) => Response::Ack,
            }
        }

        async fn member_joined(&self, _: Member) {}

        async fn member_left(&self, member: Member) {
            self.locks.member_left(&member);
        }
    }

    fn node(transport: Arc<LocalTransport>) -> Arc<LockNode> {
        let options = LockOptions {
            coordinator_timeout: Duration::from_millis(20),
            backoff: vec![Duration::from_millis(1), Duration::from_millis(5)],
        };
        let node = Arc::new(LockNode {
            locks: DistributedLockManager::new(
                slog::Logger::root(slog::Discard, slog::o!()),
                Arc::new(LocalLockManager::new()),
                transport.clone(),
                options,
            ),
        });
        let weak: Weak<dyn GroupReceiver> = Arc::downgrade(&node) as Weak<dyn GroupReceiver>;
        transport.set_receiver(weak);
        node
    }

    #[tokio::test]
    async fn coordinator_lock_excludes_other_member_until_unlocked() {
        // -- setup --
        let group = LocalGroup::new();
        let coordinator = node(group.join("a").await);
        let other = node(group.join("b").await);

        // -- execute --
        let held = coordinator.locks.try_write_lock(None).await.unwrap();

        // -- verify --
        assert!(other.locks.try_write_lock(None).await.is_none());
        assert!(coordinator.locks.try_write_lock(None).await.is_none());

        held.unlock().await;
        let taken = other.locks.try_write_lock(None).await.unwrap();
        assert!(coordinator.locks.try_write_lock(None).await.is_none());
        taken.unlock().await;
        assert!(coordinator.locks.try_write_lock(None).await.is_some());
    }

    #[tokio::test]
    async fn distributed_write_lock_excludes_local_readers_everywhere() {
        let group = LocalGroup::new();
        let a = node(group.join("a").await);
        let b = node(group.join("b").await);

        let held = b.locks.try_write_lock(None).await.unwrap();
        assert!(a.locks.local().try_lock(None, LockType::Read).is_none());
        assert!(b.locks.local().try_lock(None, LockType::Read).is_none());

        held.unlock().await;
        assert!(a.locks.local().try_lock(None, LockType::Read).is_some());
        assert!(b.locks.local().try_lock(None, LockType::Read).is_some());
    }

    #[tokio::test]
    async fn local_reader_blocks_distributed_writer_and_timed_variant_gives_up() {
        let group = LocalGroup::new();
        let a = node(group.join("a").await);
        let b = node(group.join("b").await);

        let reader = a.locks.read_lock(None).await;
        let result = b.locks.try_write_lock_for(None, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(LockError::TimedOut { .. })));

        drop(reader);
        assert!(b.locks.try_write_lock_for(None, Duration::from_millis(500)).await.is_ok());
    }

    #[tokio::test]
    async fn member_cannot_take_a_write_lock_it_already_holds() {
        // -- setup --
        let group = LocalGroup::new();
        let a = node(group.join("a").await);
        let b = node(group.join("b").await);
        let held = b.locks.try_write_lock(None).await.unwrap();

        // -- execute --
        let second = b.locks.try_write_lock(None).await;

        // -- verify --
        assert!(second.is_none());
        // The refused attempt released nothing the first one holds.
        assert!(b.locks.local().try_lock(None, LockType::Read).is_none());
        assert!(a.locks.local().try_lock(None, LockType::Read).is_none());

        held.unlock().await;
        assert!(b.locks.local().try_lock(None, LockType::Read).is_some());
        assert!(a.locks.local().try_lock(None, LockType::Read).is_some());
    }

    #[tokio::test]
    async fn departed_holder_releases_its_locks() {
        // -- setup --
        let group = LocalGroup::new();
        let a = node(group.join("a").await);
        let b = node(group.join("b").await);
        let held = b.locks.try_write_lock(Some("replica-db2")).await.unwrap();
        assert!(a.locks.try_write_lock(Some("replica-db2")).await.is_none());

        // -- execute --
        // b crashes without unlocking.
        std::mem::forget(held);
        group.leave(&Member::new("b")).await;

        // -- verify --
        assert!(a.locks.try_write_lock(Some("replica-db2")).await.is_some());
        drop(b);
    }

    #[tokio::test]
    async fn blocking_write_lock_waits_for_release() {
        let group = LocalGroup::new();
        let a = node(group.join("a").await);
        let b = node(group.join("b").await);

        let held = a.locks.write_lock(None).await;
        let waiter = {
            let b = b.clone();
            tokio::spawn(async move {
                let guard = b.locks.write_lock(None).await;
                guard.unlock().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        held.unlock().await;
        tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
    }
}
