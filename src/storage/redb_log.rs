use crate::storage::log::WriteOp;
use crate::storage::{KeyValue, Keyspace, PersistentLog, StorageError, WriteBatch};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;

/// RedbLog is the durable `PersistentLog`, one redb table per keyspace. Every `apply()` is one
/// redb write transaction, so a batch survives a crash entirely or not at all.
pub struct RedbLog {
    db: Database,
}

fn table(keyspace: Keyspace) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    TableDefinition::new(keyspace.name())
}

impl RedbLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Eagerly create every table so reads work before the first write.
        let txn = db.begin_write()?;
        for keyspace in Keyspace::ALL.iter() {
            let _ = txn.open_table(table(*keyspace))?;
        }
        txn.commit()?;

        Ok(RedbLog { db })
    }
}

impl PersistentLog for RedbLog {
    fn get(&self, keyspace: Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table(keyspace))?;
        let value = table.get(key)?.map(|guard| guard.value().to_vec());

        Ok(value)
    }

    fn scan_prefix(&self, keyspace: Keyspace, prefix: &[u8]) -> Result<Vec<KeyValue>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table(keyspace))?;

        let mut entries = Vec::new();
        for entry in table.range::<&[u8]>(prefix..)? {
            let (k, v) = entry?;
            if !k.value().starts_with(prefix) {
                break;
            }
            entries.push((k.value().to_vec(), v.value().to_vec()));
        }

        Ok(entries)
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }

        let txn = self.db.begin_write()?;
        for op in batch.ops {
            match op {
                WriteOp::Put(keyspace, key, value) => {
                    let mut table = txn.open_table(table(keyspace))?;
                    table.insert(key.as_slice(), value.as_slice())?;
                }
                WriteOp::Delete(keyspace, key) => {
                    let mut table = txn.open_table(table(keyspace))?;
                    table.remove(key.as_slice())?;
                }
                WriteOp::DeletePrefix(keyspace, prefix) => {
                    let mut table = txn.open_table(table(keyspace))?;
                    let mut doomed = Vec::new();
                    for entry in table.range::<&[u8]>(prefix.as_slice()..)? {
                        let (k, _) = entry?;
                        if !k.value().starts_with(&prefix) {
                            break;
                        }
                        doomed.push(k.value().to_vec());
                    }
                    for key in doomed {
                        table.remove(key.as_slice())?;
                    }
                }
            }
        }
        txn.commit()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_survive_reopen() {
        // -- setup --
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster").join("state.redb");

        // -- execute --
        {
            let log = RedbLog::open(&path).unwrap();
            let mut batch = WriteBatch::new();
            batch
                .put(Keyspace::ActiveReplicas, b"db1".to_vec(), vec![])
                .put(Keyspace::ActiveReplicas, b"db2".to_vec(), vec![])
                .put(Keyspace::Invokers, b"tx/1".to_vec(), vec![7]);
            log.apply(batch).unwrap();
            log.delete(Keyspace::ActiveReplicas, b"db1".to_vec()).unwrap();
        }

        // -- verify --
        let log = RedbLog::open(&path).unwrap();
        assert_eq!(
            log.scan(Keyspace::ActiveReplicas).unwrap(),
            vec![(b"db2".to_vec(), vec![])]
        );
        assert_eq!(log.get(Keyspace::Invokers, b"tx/1").unwrap(), Some(vec![7]));
    }

    #[test]
    fn delete_prefix_within_one_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let log = RedbLog::open(dir.path().join("state.redb")).unwrap();
        log.put(Keyspace::Invokers, b"a/1".to_vec(), vec![1]).unwrap();
        log.put(Keyspace::Invokers, b"a/2".to_vec(), vec![2]).unwrap();
        log.put(Keyspace::Invokers, b"b/1".to_vec(), vec![3]).unwrap();

        let mut batch = WriteBatch::new();
        batch
            .delete_prefix(Keyspace::Invokers, b"a/".to_vec())
            .put(Keyspace::Invokers, b"c/1".to_vec(), vec![4]);
        log.apply(batch).unwrap();

        let keys: Vec<Vec<u8>> = log
            .scan(Keyspace::Invokers)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"b/1".to_vec(), b"c/1".to_vec()]);
    }
}
