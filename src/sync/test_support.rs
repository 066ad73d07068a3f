use crate::database::{ConnectionDescriptor, MemoryDatabase, MemoryDatabases, Replica, ReplicaId, TableMetadata};
use crate::sync::{SyncOptions, SynchronizationContext, SynchronizationError};
use std::sync::Arc;

/// An active source replica "db1" (plus optionally "db3"), and an inactive target "db2".
pub(crate) struct Pair {
    pub source: Arc<MemoryDatabase>,
    pub target: Arc<MemoryDatabase>,
    databases: MemoryDatabases,
    active: Vec<Replica>,
}

fn replica(id: &str) -> Replica {
    Replica::new(id, ConnectionDescriptor::new(format!("mem://{}", id)))
}

impl Pair {
    pub fn new() -> Self {
        let databases = MemoryDatabases::new();
        let source = Arc::new(MemoryDatabase::new());
        let target = Arc::new(MemoryDatabase::new());
        databases.insert(ReplicaId::new("db1"), source.clone());
        databases.insert(ReplicaId::new("db2"), target.clone());

        Pair {
            source,
            target,
            databases,
            active: vec![replica("db1")],
        }
    }

    pub fn with_second_active() -> Self {
        let mut pair = Pair::new();
        pair.databases
            .insert(ReplicaId::new("db3"), Arc::new(MemoryDatabase::new()));
        pair.active.push(replica("db3"));
        pair
    }

    pub fn second_active(&self) -> Arc<MemoryDatabase> {
        self.databases
            .get(&ReplicaId::new("db3"))
            .expect("pair built without a second active replica")
    }

    /// Creates `table` on every database.
    pub fn table(&self, table: TableMetadata) {
        for id in ["db1", "db2", "db3"] {
            if let Some(db) = self.databases.get(&ReplicaId::new(id)) {
                db.create_table(table.clone());
            }
        }
    }

    pub async fn context(&self) -> SynchronizationContext {
        self.context_with(SyncOptions::default()).await
    }

    pub async fn context_with(&self, options: SyncOptions) -> SynchronizationContext {
        self.open(options).await.unwrap()
    }

    pub async fn try_context(&self) -> Result<SynchronizationContext, SynchronizationError> {
        self.open(SyncOptions::default()).await
    }

    async fn open(&self, options: SyncOptions) -> Result<SynchronizationContext, SynchronizationError> {
        SynchronizationContext::open(
            slog::Logger::root(slog::Discard, slog::o!()),
            &self.databases,
            replica("db1"),
            replica("db2"),
            self.active.clone(),
            options,
        )
        .await
    }
}
