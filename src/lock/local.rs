use crate::lock::LockType;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::time::Duration;

/// LocalLockManager is this process's reader/writer locks.
///
/// * Read locks, keyed or not, share the global lock.
/// * The global write lock excludes everything.
/// * A keyed write lock shares the global lock and excludes its own key.
///
/// tokio's RwLock is fair, so a waiting writer holds back readers that arrive after it.
#[derive(Default)]
pub struct LocalLockManager {
    global: Arc<RwLock<()>>,
    // Entries are never removed; the set of lock ids in use is small and fixed.
    keyed: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

/// Holds a local lock until dropped.
#[allow(dead_code)]
pub enum LocalLockGuard {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
    Keyed(OwnedRwLockReadGuard<()>, OwnedRwLockWriteGuard<()>),
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: Option<&str>, lock_type: LockType) -> LocalLockGuard {
        match (lock_type, id) {
            (LockType::Read, _) => LocalLockGuard::Read(self.global.clone().read_owned().await),
            (LockType::Write, None) => LocalLockGuard::Write(self.global.clone().write_owned().await),
            (LockType::Write, Some(id)) => {
                let global = self.global.clone().read_owned().await;
                let keyed = self.keyed(id).write_owned().await;
                LocalLockGuard::Keyed(global, keyed)
            }
        }
    }

    pub fn try_lock(&self, id: Option<&str>, lock_type: LockType) -> Option<LocalLockGuard> {
        match (lock_type, id) {
            (LockType::Read, _) => self.global.clone().try_read_owned().ok().map(LocalLockGuard::Read),
            (LockType::Write, None) => self.global.clone().try_write_owned().ok().map(LocalLockGuard::Write),
            (LockType::Write, Some(id)) => {
                let global = self.global.clone().try_read_owned().ok()?;
                let keyed = self.keyed(id).try_write_owned().ok()?;
                Some(LocalLockGuard::Keyed(global, keyed))
            }
        }
    }

    pub async fn lock_timeout(&self, id: Option<&str>, lock_type: LockType, timeout: Duration) -> Option<LocalLockGuard> {
        tokio::time::timeout(timeout, self.lock(id, lock_type)).await.ok()
    }

    fn keyed(&self, id: &str) -> Arc<RwLock<()>> {
        self.keyed
            .lock()
            .expect("LocalLockManager mutex guard poison")
            .entry(id.to_string())
            .or_default()
            .clone()
    }
}
