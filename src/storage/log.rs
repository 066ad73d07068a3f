use std::io;

/// Keyspace partitions the persistent log, like tables in a database.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Keyspace {
    /// One record per in-flight invocation.
    Invocations,
    /// One record per (invocation, replica).
    Invokers,
    /// The locally known active replica set.
    ActiveReplicas,
}

impl Keyspace {
    pub const ALL: [Keyspace; 3] = [Keyspace::Invocations, Keyspace::Invokers, Keyspace::ActiveReplicas];

    pub fn name(&self) -> &'static str {
        match self {
            Keyspace::Invocations => "invocations",
            Keyspace::Invokers => "invokers",
            Keyspace::ActiveReplicas => "active_replicas",
        }
    }
}

pub type KeyValue = (Vec<u8>, Vec<u8>);

/// PersistentLog is durable, key-ordered storage. All mutation goes through `apply()`, which
/// applies a whole batch or nothing.
///
/// Disk interaction is synchronous. Callers on the async runtime keep batches small.
pub trait PersistentLog: Send + Sync {
    fn get(&self, keyspace: Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, keyspace: Keyspace, prefix: &[u8]) -> Result<Vec<KeyValue>, StorageError>;

    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError>;

    fn scan(&self, keyspace: Keyspace) -> Result<Vec<KeyValue>, StorageError> {
        self.scan_prefix(keyspace, &[])
    }

    fn put(&self, keyspace: Keyspace, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.put(keyspace, key, value);
        self.apply(batch)
    }

    fn delete(&self, keyspace: Keyspace, key: Vec<u8>) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.delete(keyspace, key);
        self.apply(batch)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub(super) enum WriteOp {
    Put(Keyspace, Vec<u8>, Vec<u8>),
    Delete(Keyspace, Vec<u8>),
    DeletePrefix(Keyspace, Vec<u8>),
}

/// WriteBatch is an ordered list of mutations applied in one storage transaction.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct WriteBatch {
    pub(super) ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, keyspace: Keyspace, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Put(keyspace, key, value));
        self
    }

    pub fn delete(&mut self, keyspace: Keyspace, key: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Delete(keyspace, key));
        self
    }

    /// Deletes every key starting with `prefix`.
    pub fn delete_prefix(&mut self, keyspace: Keyspace, prefix: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::DeletePrefix(keyspace, prefix));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error")]
    Io(#[from] io::Error),

    #[error("Storage engine error: {0}")]
    Engine(#[from] Box<redb::Error>),

    #[error("Corrupt record in '{keyspace}': {message}")]
    Corrupt { keyspace: &'static str, message: String },
}

// ------- Conversions --------

impl From<redb::DatabaseError> for StorageError {
    fn from(e: redb::DatabaseError) -> Self {
        StorageError::Engine(Box::new(e.into()))
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(e: redb::TransactionError) -> Self {
        StorageError::Engine(Box::new(e.into()))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(e: redb::TableError) -> Self {
        StorageError::Engine(Box::new(e.into()))
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(e: redb::StorageError) -> Self {
        StorageError::Engine(Box::new(e.into()))
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(e: redb::CommitError) -> Self {
        StorageError::Engine(Box::new(e.into()))
    }
}
