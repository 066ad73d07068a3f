use crate::database::{DatabaseMetadata, ForeignKey, Replica, Row, SequenceMetadata, TableMetadata, UniqueConstraint, Value};
use std::sync::Arc;

/// Connection is a live session against one backing database. It is the only way the cluster
/// core touches replica data: liveness probes and synchronization go through it. The dialect
/// adapter (out of this crate) implements it per database product.
///
/// Methods take `&self` so one connection can be shared by parallel per-table tasks; an impl
/// that can't multiplex should serialize internally.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Cheap liveness check, used by failure detection.
    async fn is_valid(&self) -> bool;

    async fn metadata(&self) -> Result<DatabaseMetadata, ConnectionError>;

    /// Returns at most `limit` rows ordered by primary key, starting strictly after `after_key`
    /// (or from the beginning if `None`).
    async fn read_rows(
        &self,
        table: &TableMetadata,
        after_key: Option<&[Value]>,
        limit: usize,
    ) -> Result<Vec<Row>, ConnectionError>;

    async fn truncate(&self, table: &TableMetadata) -> Result<(), ConnectionError>;

    async fn insert_rows(&self, table: &TableMetadata, rows: &[Row]) -> Result<u64, ConnectionError>;

    /// Rows are matched on their primary key columns.
    async fn update_rows(&self, table: &TableMetadata, rows: &[Row]) -> Result<u64, ConnectionError>;

    /// Each element of `keys` holds primary key values only, in key order.
    async fn delete_rows(&self, table: &TableMetadata, keys: &[Vec<Value>]) -> Result<u64, ConnectionError>;

    async fn drop_foreign_key(&self, fk: &ForeignKey) -> Result<(), ConnectionError>;
    async fn create_foreign_key(&self, fk: &ForeignKey) -> Result<(), ConnectionError>;
    async fn drop_unique_constraint(&self, constraint: &UniqueConstraint) -> Result<(), ConnectionError>;
    async fn create_unique_constraint(&self, constraint: &UniqueConstraint) -> Result<(), ConnectionError>;

    async fn sequence_value(&self, sequence: &SequenceMetadata) -> Result<i64, ConnectionError>;
    async fn set_sequence_value(&self, sequence: &SequenceMetadata, value: i64) -> Result<(), ConnectionError>;

    async fn close(&self);
}

/// ConnectionFactory opens connections to a replica from its `ConnectionDescriptor`.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, replica: &Replica) -> Result<Arc<dyn Connection>, ConnectionError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Unable to connect to {location}: {message}")]
    Unreachable { location: String, message: String },

    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    #[error("Unknown sequence '{0}'")]
    UnknownSequence(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Database error: {0}")]
    Database(String),
}
