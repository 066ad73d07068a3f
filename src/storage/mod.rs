mod factory;
mod in_memory;
mod log;
mod redb_log;

pub use factory::StorageConfig;
pub use in_memory::InMemoryLog;
pub use log::KeyValue;
pub use log::Keyspace;
pub use log::PersistentLog;
pub use log::StorageError;
pub use log::WriteBatch;
pub use redb_log::RedbLog;
