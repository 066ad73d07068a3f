use crate::storage::log::WriteOp;
use crate::storage::{KeyValue, Keyspace, PersistentLog, StorageError, WriteBatch};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// InMemoryLog keeps everything in process memory. It gives the same ordering and batch
/// semantics as the durable log, but nothing survives a restart, so it only suits tests and
/// deployments whose durability level is None.
#[derive(Default)]
pub struct InMemoryLog {
    keyspaces: Mutex<BTreeMap<Keyspace, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentLog for InMemoryLog {
    fn get(&self, keyspace: Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let keyspaces = self.keyspaces.lock().expect("InMemoryLog mutex guard poison");
        Ok(keyspaces.get(&keyspace).and_then(|entries| entries.get(key)).cloned())
    }

    fn scan_prefix(&self, keyspace: Keyspace, prefix: &[u8]) -> Result<Vec<KeyValue>, StorageError> {
        let keyspaces = self.keyspaces.lock().expect("InMemoryLog mutex guard poison");
        let entries = match keyspaces.get(&keyspace) {
            Some(entries) => entries,
            None => return Ok(vec![]),
        };

        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut keyspaces = self.keyspaces.lock().expect("InMemoryLog mutex guard poison");
        for op in batch.ops {
            match op {
                WriteOp::Put(keyspace, key, value) => {
                    keyspaces.entry(keyspace).or_default().insert(key, value);
                }
                WriteOp::Delete(keyspace, key) => {
                    if let Some(entries) = keyspaces.get_mut(&keyspace) {
                        entries.remove(&key);
                    }
                }
                WriteOp::DeletePrefix(keyspace, prefix) => {
                    if let Some(entries) = keyspaces.get_mut(&keyspace) {
                        entries.retain(|k, _| !k.starts_with(&prefix));
                    }
                }
            }
        }

        Ok(())
    }
}
