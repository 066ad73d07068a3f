use crate::dispatch::{Dispatcher, InvocationError, InvocationStrategy, Invoker};
use crate::durability::{Phase, TransactionId};
use crate::lock::LocalLockGuard;
use std::fmt;
use std::sync::Arc;

/// TransactionContext is a transaction spanning every active replica. It holds the local read
/// lock for its whole life, so replica activation waits until it's committed or rolled back.
///
/// Statements run on every replica but aren't tracked individually. The completion phases are
/// recorded, since that's where replicas can end up disagreeing after a crash.
pub struct TransactionContext<T: Send + Sync + 'static, E> {
    dispatcher: Dispatcher<T, E>,
    transaction_id: TransactionId,
    _lock: LocalLockGuard,
}

impl<T, E> TransactionContext<T, E>
where
    T: Send + Sync + 'static,
    E: fmt::Display + PartialEq + Send + Sync + 'static,
{
    pub(super) fn new(dispatcher: Dispatcher<T, E>, transaction_id: TransactionId, lock: LocalLockGuard) -> Self {
        TransactionContext {
            dispatcher,
            transaction_id,
            _lock: lock,
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub async fn invoke<I>(&self, invoker: Arc<I>) -> Result<I::Output, InvocationError<E>>
    where
        I: Invoker<T, E> + 'static,
    {
        self.dispatcher.invoke(InvocationStrategy::All, invoker).await
    }

    /// First phase of a two-phase commit.
    pub async fn prepare<I>(&self, invoker: Arc<I>) -> Result<I::Output, InvocationError<E>>
    where
        I: Invoker<T, E> + 'static,
    {
        self.dispatcher
            .invoke_durably(self.transaction_id.clone(), Phase::Prepare, invoker)
            .await
    }

    pub async fn commit<I>(self, invoker: Arc<I>) -> Result<I::Output, InvocationError<E>>
    where
        I: Invoker<T, E> + 'static,
    {
        self.dispatcher
            .invoke_durably(self.transaction_id.clone(), Phase::Commit, invoker)
            .await
    }

    pub async fn rollback<I>(self, invoker: Arc<I>) -> Result<I::Output, InvocationError<E>>
    where
        I: Invoker<T, E> + 'static,
    {
        self.dispatcher
            .invoke_durably(self.transaction_id.clone(), Phase::Rollback, invoker)
            .await
    }
}
