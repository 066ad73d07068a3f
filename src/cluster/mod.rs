mod cluster;
mod node;
mod options;
mod wiring;

pub use cluster::ActivationError;
pub use cluster::DatabaseCluster;
pub use options::ClusterOptions;
pub use wiring::try_create_cluster;
pub use wiring::ClusterConfig;
pub use wiring::ClusterCreationError;
