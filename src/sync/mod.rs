mod constraints;
mod context;
mod cursor;
mod differential;
mod dump_restore;
mod full;
mod sequences;
mod strategy;
#[cfg(test)]
mod test_support;

pub use context::SynchronizationContext;
pub use differential::DifferentialStrategy;
pub use dump_restore::CommandTemplate;
pub use dump_restore::DumpRestoreStrategy;
pub use full::FullStrategy;
pub use sequences::synchronize_sequences;
pub use strategy::PassiveStrategy;
pub use strategy::SyncOptions;
pub use strategy::SynchronizationError;
pub use strategy::SynchronizationStrategy;
