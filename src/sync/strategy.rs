use crate::database::{ConnectionError, ReplicaId};
use crate::sync::SynchronizationContext;
use regex::Regex;
use std::io;

/// SynchronizationStrategy brings an inactive replica's data in line with the active ones
/// before it is activated again.
#[async_trait::async_trait]
pub trait SynchronizationStrategy: Send + Sync {
    /// Stable identifier, used to pick a strategy by name.
    fn id(&self) -> &str;

    async fn synchronize(&self, context: &SynchronizationContext) -> Result<(), SynchronizationError>;

    /// Whether sequence high-water marks are pushed to the target after `synchronize`.
    fn synchronizes_sequences(&self) -> bool {
        true
    }
}

/// Tuning shared by the strategies.
#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Tables synchronized at the same time.
    pub concurrency: usize,
    /// Rows per insert/update/delete statement.
    pub batch_size: usize,
    /// Rows read per round trip.
    pub fetch_size: usize,
    /// Columns whose name matches are treated as row versions: when a table has one, only
    /// that column is compared to decide whether a row changed.
    pub version_pattern: Option<Regex>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            concurrency: 4,
            batch_size: 100,
            fetch_size: 1000,
            version_pattern: None,
        }
    }
}

/// Assumes the target is already in sync and does nothing.
pub struct PassiveStrategy;

impl PassiveStrategy {
    pub const ID: &'static str = "passive";
}

#[async_trait::async_trait]
impl SynchronizationStrategy for PassiveStrategy {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn synchronize(&self, context: &SynchronizationContext) -> Result<(), SynchronizationError> {
        slog::debug!(context.logger(), "Assuming {} is in sync", context.target_replica().id());
        Ok(())
    }

    fn synchronizes_sequences(&self) -> bool {
        false
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SynchronizationError {
    #[error("Connection failed")]
    Connection(#[from] ConnectionError),

    #[error("Table '{table}' doesn't match between source and target: {reason}")]
    SchemaMismatch { table: String, reason: String },

    #[error("Sequence '{sequence}' differs across active replicas: {values:?}")]
    SequenceOutOfSync {
        sequence: String,
        values: Vec<(ReplicaId, i64)>,
    },

    #[error("'{program}' failed: {message}")]
    Command { program: String, message: String },

    #[error("IO error")]
    Io(#[from] io::Error),

    #[error("Unknown synchronization strategy '{0}'")]
    UnknownStrategy(String),
}
