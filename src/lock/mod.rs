mod backoff;
mod descriptor;
mod distributed;
mod local;

pub use descriptor::LockDescriptor;
pub use descriptor::LockType;
pub use distributed::DistributedLockGuard;
pub use distributed::DistributedLockManager;
pub use distributed::LockError;
pub use distributed::LockOptions;
pub use local::LocalLockGuard;
pub use local::LocalLockManager;
