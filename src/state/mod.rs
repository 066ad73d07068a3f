mod actor;
mod membership;
mod manager;

pub use manager::StateError;
pub use manager::StateManager;
pub use manager::StateManagerConfig;
