mod connection;
mod memory;
mod metadata;
mod replica;
mod value;

pub use connection::Connection;
pub use connection::ConnectionError;
pub use connection::ConnectionFactory;
pub use memory::DmlCounts;
pub use memory::MemoryDatabase;
pub use memory::MemoryDatabases;
pub use metadata::DatabaseMetadata;
pub use metadata::ForeignKey;
pub use metadata::SequenceMetadata;
pub use metadata::TableMetadata;
pub use metadata::UniqueConstraint;
pub use replica::ConnectionDescriptor;
pub use replica::Credentials;
pub use replica::Locality;
pub use replica::Replica;
pub use replica::ReplicaId;
pub use value::compare_keys;
pub use value::Row;
pub use value::Value;
