use crate::storage::{InMemoryLog, PersistentLog, RedbLog, StorageError};
use std::path::PathBuf;
use std::sync::Arc;

/// Which `PersistentLog` a cluster member keeps its state in.
#[derive(Clone, Debug)]
pub enum StorageConfig {
    InMemory,
    Redb { path: PathBuf },
}

impl StorageConfig {
    pub fn open(&self) -> Result<Arc<dyn PersistentLog>, StorageError> {
        let log: Arc<dyn PersistentLog> = match self {
            StorageConfig::InMemory => Arc::new(InMemoryLog::new()),
            StorageConfig::Redb { path } => Arc::new(RedbLog::open(path)?),
        };

        Ok(log)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::InMemory
    }
}
