mod dispatcher;
mod invoker;
mod reconcile;
mod targets;
mod transaction;

pub use dispatcher::DispatchOptions;
pub use dispatcher::Dispatcher;
pub use dispatcher::DispatcherConfig;
pub use dispatcher::InvocationError;
pub use dispatcher::InvocationStrategy;
pub use invoker::FailureClassifier;
pub use invoker::Invoker;
pub use invoker::ReplicaDeactivator;
pub use targets::TargetFactory;
pub use targets::Targets;
pub use transaction::TransactionContext;
