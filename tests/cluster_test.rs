use dbcluster::{
    try_create_cluster, ClusterConfig, ClusterOptions, Connection, ConnectionDescriptor, ConnectionError,
    DatabaseCluster, Dispatcher, DurabilityLevel, FailureClassifier, InvocationError, InvocationStrategy, Invoker,
    LocalGroup, Member, MemoryDatabase, MemoryDatabases, Replica, ReplicaId, Row, StorageConfig, TableMetadata,
    TargetFactory, Value,
};
use slog::Drain;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

#[tokio::test]
async fn members_share_active_replicas_and_write_lock() -> Result<(), Box<dyn Error>> {
    // -- setup --
    let fixture = Fixture::new(&["db1", "db2"]);
    let m1 = fixture.member("m1", ClusterOptions::default()).await?;
    let m2 = fixture.member("m2", ClusterOptions::default()).await?;

    // -- execute & verify --

    // 1. The first member finds no state and activates every live replica; the second one
    //    adopts the coordinator's view.
    assert_eq!(m1.start().await?, vec![id("db1"), id("db2")]);
    assert_eq!(m2.start().await?, vec![id("db1"), id("db2")]);

    // 2. Deactivations are broadcast.
    assert!(m1.deactivate(&id("db2")).await?);
    assert!(!m2.is_active(&id("db2")));

    // 3. The last active replica stays.
    assert!(!m2.deactivate(&id("db1")).await?);
    assert_eq!(m1.active_replicas(), vec![id("db1")]);

    // 4. The write lock is exclusive across members.
    let lock = m1.lock_manager().write_lock(None).await;
    assert!(m2.lock_manager().try_write_lock(None).await.is_none());
    lock.unlock().await;
    let lock = m2
        .lock_manager()
        .try_write_lock(None)
        .await
        .expect("Expected lock to be free");
    lock.unlock().await;

    Ok(())
}

#[tokio::test]
async fn activation_synchronizes_stale_replica() -> Result<(), Box<dyn Error>> {
    // -- setup --
    let fixture = Fixture::new(&["db1", "db2"]);
    let db1 = fixture.db("db1");
    let db2 = fixture.db("db2");
    db1.load("item", vec![row(1, "one"), row(2, "two"), row(3, "three")])?;
    db2.load("item", vec![row(1, "one"), row(2, "deux"), row(4, "four")])?;
    db1.create_sequence("item_seq", 3);
    db2.create_sequence("item_seq", 1);

    db2.set_valid(false);
    let cluster = fixture.member("m1", ClusterOptions::default()).await?;
    assert_eq!(cluster.start().await?, vec![id("db1")]);
    db2.set_valid(true);
    db2.reset_dml_counts();

    // -- execute --
    let activated = cluster.activate_with(&id("db2"), "differential").await?;

    // -- verify --
    assert!(activated);
    assert_eq!(cluster.active_replicas(), vec![id("db1"), id("db2")]);
    assert_eq!(db2.rows("item"), db1.rows("item"));
    assert_eq!(db2.sequence("item_seq"), Some(3));
    let counts = db2.dml_counts();
    assert_eq!((counts.inserted, counts.updated, counts.deleted), (1, 1, 1));

    // Already active.
    assert!(!cluster.activate(&id("db2")).await?);

    Ok(())
}

#[tokio::test]
async fn writes_deactivate_unreachable_replicas() -> Result<(), Box<dyn Error>> {
    // -- setup --
    let fixture = Fixture::new(&["db1", "db2", "db3"]);
    let cluster = fixture.member("m1", ClusterOptions::default()).await?;
    cluster.start().await?;
    let dispatcher = fixture.dispatcher(&cluster);
    fixture.db("db3").set_valid(false);

    // -- execute --
    let inserted = dispatcher.invoke_write(Arc::new(Insert(row(7, "seven")))).await?;

    // -- verify --
    assert_eq!(inserted, 1);
    assert_eq!(cluster.active_replicas(), vec![id("db1"), id("db2")]);
    for db in ["db1", "db2"] {
        assert_eq!(fixture.db(db).rows("item"), vec![row(7, "seven")]);
    }

    // A duplicate key is the caller's problem, not the replicas'.
    let result = dispatcher.invoke_write(Arc::new(Insert(row(7, "again")))).await;
    assert!(matches!(result, Err(InvocationError::Replica(DbError::Rejected(_)))));
    assert_eq!(cluster.active_replicas(), vec![id("db1"), id("db2")]);

    // Reads go to a single replica.
    let read = dispatcher.invoke(InvocationStrategy::Next, Arc::new(Count)).await?;
    assert_eq!(read, 1);

    Ok(())
}

#[tokio::test]
async fn coordinator_recovers_invocations_of_departed_member() -> Result<(), Box<dyn Error>> {
    // -- setup --
    let fixture = Fixture::new(&["db1", "db2"]);
    let options = ClusterOptions {
        durability: Some(DurabilityLevel::Coarse),
        ..ClusterOptions::default()
    };
    let m1 = fixture.member("m1", options.clone()).await?;
    let m2 = fixture.member("m2", options).await?;
    m1.start().await?;
    m2.start().await?;

    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let dispatcher = fixture.dispatcher(&m2);
    let write = dispatcher.invoke_write(Arc::new(Stall(started_tx)));
    tokio::pin!(write);

    // -- execute --

    // m2 dies while its write is in flight on every replica.
    tokio::select! {
        _ = &mut write => panic!("Stalled write finished"),
        started = started_rx.recv() => started.expect("Expected the write to start"),
    }
    fixture.group.leave(&Member::new("m2")).await;

    // -- verify --
    assert_eq!(m1.active_replicas(), vec![id("db1")]);

    Ok(())
}

// ---------- Fixtures ----------

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
enum DbError {
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<ConnectionError> for DbError {
    fn from(e: ConnectionError) -> Self {
        let message = e.to_string();
        match e {
            ConnectionError::Unreachable { .. } => DbError::Unreachable(message),
            _ => DbError::Rejected(message),
        }
    }
}

struct Connections(Arc<MemoryDatabases>);

#[async_trait::async_trait]
impl TargetFactory<Arc<dyn Connection>, DbError> for Connections {
    async fn open(&self, replica: &Replica) -> Result<Arc<dyn Connection>, DbError> {
        use dbcluster::ConnectionFactory;
        Ok(self.0.connect(replica).await?)
    }
}

struct Insert(Row);

#[async_trait::async_trait]
impl Invoker<Arc<dyn Connection>, DbError> for Insert {
    type Output = u64;

    async fn invoke(&self, _: &Replica, connection: &Arc<dyn Connection>) -> Result<u64, DbError> {
        Ok(connection.insert_rows(&item_table(), &[self.0.clone()]).await?)
    }
}

struct Count;

#[async_trait::async_trait]
impl Invoker<Arc<dyn Connection>, DbError> for Count {
    type Output = usize;

    async fn invoke(&self, _: &Replica, connection: &Arc<dyn Connection>) -> Result<usize, DbError> {
        let rows = connection.read_rows(&item_table(), None, usize::MAX).await?;
        Ok(rows.len())
    }
}

/// Reports that it started, then never finishes.
struct Stall(mpsc::UnboundedSender<()>);

#[async_trait::async_trait]
impl Invoker<Arc<dyn Connection>, DbError> for Stall {
    type Output = u64;

    async fn invoke(&self, _: &Replica, _: &Arc<dyn Connection>) -> Result<u64, DbError> {
        let _ = self.0.send(());
        futures::future::pending().await
    }
}

/// Replicas backed by in-memory databases, and a group for the members to join.
struct Fixture {
    group: LocalGroup,
    replica_ids: Vec<&'static str>,
    databases: Arc<MemoryDatabases>,
}

impl Fixture {
    fn new(replica_ids: &[&'static str]) -> Self {
        let databases = Arc::new(MemoryDatabases::new());
        for replica_id in replica_ids {
            let database = MemoryDatabase::new();
            database.create_table(item_table());
            databases.insert(id(replica_id), Arc::new(database));
        }

        Fixture {
            group: LocalGroup::new(),
            replica_ids: replica_ids.to_vec(),
            databases,
        }
    }

    fn db(&self, replica_id: &str) -> Arc<MemoryDatabase> {
        self.databases.get(&id(replica_id)).expect("Unknown database")
    }

    async fn member(&self, name: &str, options: ClusterOptions) -> Result<DatabaseCluster, Box<dyn Error>> {
        let replicas = self
            .replica_ids
            .iter()
            .map(|replica_id| Replica::new(*replica_id, ConnectionDescriptor::new(format!("mem://{}", replica_id))))
            .collect();

        let cluster = try_create_cluster(ClusterConfig {
            cluster_id: "test-cluster".into(),
            replicas,
            storage: StorageConfig::InMemory,
            transport: self.group.join(name).await,
            connections: self.databases.clone(),
            strategies: vec![],
            info_logger: create_root_logger_for_stdout(name.to_string()),
            options: ClusterOptions {
                lock_backoff: Some(vec![Duration::from_millis(1)]),
                ..options
            },
        })
        .await?;

        Ok(cluster)
    }

    fn dispatcher(&self, cluster: &DatabaseCluster) -> Dispatcher<Arc<dyn Connection>, DbError> {
        let targets: Arc<dyn TargetFactory<Arc<dyn Connection>, DbError>> =
            Arc::new(Connections(self.databases.clone()));
        let classifier: Arc<dyn FailureClassifier<DbError>> =
            Arc::new(|e: &DbError| matches!(e, DbError::Unreachable(_)));
        cluster.dispatcher(targets, classifier)
    }
}

fn item_table() -> TableMetadata {
    TableMetadata::new("item", &["id", "name"], &["id"])
}

fn row(key: i64, name: &str) -> Row {
    vec![Value::from(key), Value::from(name)]
}

fn id(replica_id: &str) -> ReplicaId {
    ReplicaId::new(replica_id)
}

fn create_root_logger_for_stdout(member: String) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("Member" => member))
}
