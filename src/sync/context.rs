use crate::database::{Connection, ConnectionFactory, DatabaseMetadata, Replica, TableMetadata};
use crate::sync::{SyncOptions, SynchronizationError};
use std::sync::Arc;

/// SynchronizationContext is everything a strategy works with: connections to the source
/// (the primary), to the target being reactivated, and to every active replica, plus the
/// schema of both ends.
pub struct SynchronizationContext {
    logger: slog::Logger,
    source: Replica,
    target: Replica,
    source_connection: Arc<dyn Connection>,
    target_connection: Arc<dyn Connection>,
    active: Vec<(Replica, Arc<dyn Connection>)>,
    source_metadata: DatabaseMetadata,
    target_metadata: DatabaseMetadata,
    options: SyncOptions,
}

impl SynchronizationContext {
    /// Connects to every replica involved. If any step fails, the connections opened so far are
    /// closed before the error is returned.
    pub async fn open(
        logger: slog::Logger,
        connections: &dyn ConnectionFactory,
        source: Replica,
        target: Replica,
        active: Vec<Replica>,
        options: SyncOptions,
    ) -> Result<Self, SynchronizationError> {
        let mut opened = Vec::new();
        match Self::connect_all(connections, &source, &target, active, &mut opened).await {
            Ok((source_connection, target_connection, active, source_metadata, target_metadata)) => {
                Ok(SynchronizationContext {
                    logger: logger.new(slog::o!("Target" => target.id().to_string())),
                    source,
                    target,
                    source_connection,
                    target_connection,
                    active,
                    source_metadata,
                    target_metadata,
                    options,
                })
            }
            Err(e) => {
                slog::warn!(logger, "Failed to open synchronization context for {}: {}", target.id(), e);
                for connection in opened {
                    connection.close().await;
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    async fn connect_all(
        connections: &dyn ConnectionFactory,
        source: &Replica,
        target: &Replica,
        active: Vec<Replica>,
        opened: &mut Vec<Arc<dyn Connection>>,
    ) -> Result<
        (
            Arc<dyn Connection>,
            Arc<dyn Connection>,
            Vec<(Replica, Arc<dyn Connection>)>,
            DatabaseMetadata,
            DatabaseMetadata,
        ),
        SynchronizationError,
    > {
        let source_connection = connections.connect(source).await?;
        opened.push(source_connection.clone());
        let target_connection = connections.connect(target).await?;
        opened.push(target_connection.clone());

        let mut active_connections = Vec::with_capacity(active.len());
        for replica in active {
            let connection = if replica.id() == source.id() {
                source_connection.clone()
            } else {
                let connection = connections.connect(&replica).await?;
                opened.push(connection.clone());
                connection
            };
            active_connections.push((replica, connection));
        }

        let source_metadata = source_connection.metadata().await?;
        let target_metadata = target_connection.metadata().await?;

        Ok((
            source_connection,
            target_connection,
            active_connections,
            source_metadata,
            target_metadata,
        ))
    }

    pub fn logger(&self) -> &slog::Logger {
        &self.logger
    }

    pub fn source_replica(&self) -> &Replica {
        &self.source
    }

    pub fn target_replica(&self) -> &Replica {
        &self.target
    }

    pub fn source(&self) -> &dyn Connection {
        self.source_connection.as_ref()
    }

    pub fn target(&self) -> &dyn Connection {
        self.target_connection.as_ref()
    }

    /// Every active replica with its connection, the source included.
    pub fn active(&self) -> &[(Replica, Arc<dyn Connection>)] {
        &self.active
    }

    pub fn source_metadata(&self) -> &DatabaseMetadata {
        &self.source_metadata
    }

    pub fn target_metadata(&self) -> &DatabaseMetadata {
        &self.target_metadata
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// The target's version of a source table. Both must have the same columns and key.
    pub fn target_table(&self, table: &TableMetadata) -> Result<&TableMetadata, SynchronizationError> {
        let mismatch = |reason: &str| SynchronizationError::SchemaMismatch {
            table: table.name.clone(),
            reason: reason.to_string(),
        };

        let target = self
            .target_metadata
            .table(&table.name)
            .ok_or_else(|| mismatch("missing on target"))?;
        if target.columns != table.columns {
            return Err(mismatch("columns differ"));
        }
        if target.primary_key != table.primary_key {
            return Err(mismatch("primary keys differ"));
        }
        if table.primary_key.is_empty() {
            return Err(mismatch("no primary key"));
        }
        Ok(target)
    }

    pub async fn close(&self) {
        self.target_connection.close().await;
        for (replica, connection) in &self.active {
            if replica.id() != self.source.id() {
                connection.close().await;
            }
        }
        self.source_connection.close().await;
    }
}
