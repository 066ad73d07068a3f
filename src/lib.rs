mod balancer;
mod cluster;
mod database;
mod dispatch;
mod durability;
mod lock;
mod scheduler;
mod state;
mod storage;
mod sync;
mod transport;

pub use balancer::Balancer;
pub use balancer::BalancerPolicy;
pub use balancer::LoadGuard;
pub use balancer::Snapshot;
pub use cluster::try_create_cluster;
pub use cluster::ActivationError;
pub use cluster::ClusterConfig;
pub use cluster::ClusterCreationError;
pub use cluster::ClusterOptions;
pub use cluster::DatabaseCluster;
pub use database::compare_keys;
pub use database::Connection;
pub use database::ConnectionDescriptor;
pub use database::ConnectionError;
pub use database::ConnectionFactory;
pub use database::Credentials;
pub use database::DatabaseMetadata;
pub use database::DmlCounts;
pub use database::ForeignKey;
pub use database::Locality;
pub use database::MemoryDatabase;
pub use database::MemoryDatabases;
pub use database::Replica;
pub use database::ReplicaId;
pub use database::Row;
pub use database::SequenceMetadata;
pub use database::TableMetadata;
pub use database::UniqueConstraint;
pub use database::Value;
pub use dispatch::DispatchOptions;
pub use dispatch::Dispatcher;
pub use dispatch::DispatcherConfig;
pub use dispatch::FailureClassifier;
pub use dispatch::InvocationError;
pub use dispatch::InvocationStrategy;
pub use dispatch::Invoker;
pub use dispatch::ReplicaDeactivator;
pub use dispatch::TargetFactory;
pub use dispatch::Targets;
pub use dispatch::TransactionContext;
pub use durability::Durability;
pub use durability::DurabilityError;
pub use durability::DurabilityEvent;
pub use durability::DurabilityLevel;
pub use durability::DurabilityListener;
pub use durability::ErrorDomain;
pub use durability::InvocationEvent;
pub use durability::InvokerEvent;
pub use durability::InvokerOutcome;
pub use durability::Phase;
pub use durability::RecordedValue;
pub use durability::ResultComparison;
pub use durability::TransactionId;
pub use lock::DistributedLockGuard;
pub use lock::DistributedLockManager;
pub use lock::LocalLockGuard;
pub use lock::LocalLockManager;
pub use lock::LockDescriptor;
pub use lock::LockError;
pub use lock::LockOptions;
pub use lock::LockType;
pub use scheduler::mocked_clock;
pub use scheduler::probe;
pub use scheduler::AutoActivationTask;
pub use scheduler::Clock;
pub use scheduler::FailureDetectionTask;
pub use scheduler::MockClock;
pub use scheduler::MockClockController;
pub use scheduler::RealClock;
pub use scheduler::ReplicaActivator;
pub use scheduler::ScheduledTask;
pub use scheduler::Scheduler;
pub use scheduler::SchedulerGate;
pub use state::StateError;
pub use storage::InMemoryLog;
pub use storage::KeyValue;
pub use storage::Keyspace;
pub use storage::PersistentLog;
pub use storage::RedbLog;
pub use storage::StorageConfig;
pub use storage::StorageError;
pub use storage::WriteBatch;
pub use sync::CommandTemplate;
pub use sync::DifferentialStrategy;
pub use sync::DumpRestoreStrategy;
pub use sync::FullStrategy;
pub use sync::synchronize_sequences;
pub use sync::PassiveStrategy;
pub use sync::SyncOptions;
pub use sync::SynchronizationContext;
pub use sync::SynchronizationError;
pub use sync::SynchronizationStrategy;
pub use transport::Command;
pub use transport::GroupReceiver;
pub use transport::GroupTransport;
pub use transport::LocalGroup;
pub use transport::LocalTransport;
pub use transport::LockCommand;
pub use transport::Member;
pub use transport::Response;
pub use transport::StateCommand;
pub use transport::TransportError;

// `crate::{root_mod}` holds no code, only `mod` and `pub use` statements. Modules are never
// `pub`; items are exported one by one.
