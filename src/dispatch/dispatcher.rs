use crate::balancer::Balancer;
use crate::database::{Replica, ReplicaId};
use crate::dispatch::reconcile::{self, Outcome, Reason};
use crate::dispatch::{
    FailureClassifier, Invoker, ReplicaDeactivator, TargetFactory, Targets, TransactionContext,
};
use crate::durability::{
    Durability, DurabilityError, ErrorDomain, InvocationEvent, InvokerEvent, InvokerOutcome, Phase,
    TransactionId,
};
use crate::lock::{LocalLockManager, LockType};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{Duration, Instant};

/// Which replicas an invocation goes to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InvocationStrategy {
    /// Every active replica. Outcomes are reconciled against the primary.
    All,
    /// Replicas that already have an open target, one at a time. Falls back to `Next` once they
    /// are exhausted.
    Any,
    /// The balancer's pick. Retried on another replica after a replica failure.
    Next,
    /// The lowest active replica. Retried like `Next`.
    Primary,
    /// Every active replica that already has an open target. Used for operations that only make
    /// sense where a target exists, e.g. closing it.
    Existing,
}

#[derive(Clone, Debug)]
pub struct DispatchOptions {
    /// Upper bound on replicas invoked concurrently across all fan-outs.
    pub concurrency: usize,
    /// How long to wait for any single replica. None waits forever.
    pub timeout: Option<Duration>,
    pub allow_empty: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        DispatchOptions {
            concurrency: 16,
            timeout: None,
            allow_empty: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvocationError<E> {
    #[error("No active replicas")]
    NoActiveReplicas,

    #[error("Replica error: {0}")]
    Replica(E),

    #[error("Replicas did not answer in time")]
    TimedOut,

    #[error("Failed to record invocation")]
    Durability(#[from] DurabilityError),
}

pub struct DispatcherConfig<T: Send + Sync + 'static, E> {
    pub logger: slog::Logger,
    pub balancer: Balancer,
    pub targets: Arc<dyn TargetFactory<T, E>>,
    pub durability: Durability,
    pub deactivator: Arc<dyn ReplicaDeactivator>,
    pub classifier: Arc<dyn FailureClassifier<E>>,
    pub locks: Arc<LocalLockManager>,
    pub options: DispatchOptions,
}

/// Dispatcher runs invokers against the active replicas and keeps them consistent: replicas
/// that fail or disagree with the primary get deactivated.
pub struct Dispatcher<T: Send + Sync + 'static, E> {
    inner: Arc<Inner<T, E>>,
}

struct Inner<T: Send + Sync + 'static, E> {
    logger: slog::Logger,
    balancer: Balancer,
    targets: Targets<T, E>,
    durability: Durability,
    deactivator: Arc<dyn ReplicaDeactivator>,
    classifier: Arc<dyn FailureClassifier<E>>,
    locks: Arc<LocalLockManager>,
    permits: Arc<Semaphore>,
    options: DispatchOptions,
}

impl<T: Send + Sync + 'static, E> Clone for Dispatcher<T, E> {
    fn clone(&self) -> Self {
        Dispatcher {
            inner: self.inner.clone(),
        }
    }
}

#[derive(Copy, Clone)]
enum Fanout {
    All,
    Existing,
}

#[derive(Copy, Clone)]
enum Selector {
    Next,
    Primary,
}

enum Step<O, E> {
    Done(Result<O, InvocationError<E>>),
    Retry,
}

impl<T, E> Dispatcher<T, E>
where
    T: Send + Sync + 'static,
    E: fmt::Display + PartialEq + Send + Sync + 'static,
{
    pub fn new(config: DispatcherConfig<T, E>) -> Self {
        let permits = Arc::new(Semaphore::new(config.options.concurrency.max(1)));
        Dispatcher {
            inner: Arc::new(Inner {
                logger: config.logger,
                balancer: config.balancer,
                targets: Targets::new(config.targets),
                durability: config.durability,
                deactivator: config.deactivator,
                classifier: config.classifier,
                locks: config.locks,
                permits,
                options: config.options,
            }),
        }
    }

    pub fn balancer(&self) -> &Balancer {
        &self.inner.balancer
    }

    pub fn targets(&self) -> &Targets<T, E> {
        &self.inner.targets
    }

    /// Runs `invoker` per `strategy`. Nothing is made durable; use `invoke_write` or a
    /// transaction for operations that modify replicas.
    pub async fn invoke<I>(
        &self,
        strategy: InvocationStrategy,
        invoker: Arc<I>,
    ) -> Result<I::Output, InvocationError<E>>
    where
        I: Invoker<T, E> + 'static,
    {
        self.inner
            .targets
            .close_inactive(&self.inner.balancer.snapshot())
            .await;

        match strategy {
            InvocationStrategy::All => self.invoke_on_many(Fanout::All, invoker, None).await,
            InvocationStrategy::Existing => self.invoke_on_many(Fanout::Existing, invoker, None).await,
            InvocationStrategy::Next => self.invoke_on_one(Selector::Next, invoker.as_ref()).await,
            InvocationStrategy::Primary => self.invoke_on_one(Selector::Primary, invoker.as_ref()).await,
            InvocationStrategy::Any => self.invoke_on_any(invoker.as_ref()).await,
        }
    }

    /// Runs an auto-committed write on every active replica. Holds the local read lock, so it
    /// never overlaps with a replica activation.
    pub async fn invoke_write<I>(&self, invoker: Arc<I>) -> Result<I::Output, InvocationError<E>>
    where
        I: Invoker<T, E> + 'static,
    {
        let _lock = self.inner.locks.lock(None, LockType::Read).await;
        self.invoke_durably(TransactionId::random(), Phase::Commit, invoker)
            .await
    }

    /// Starts a transaction. Replicas can't be activated until it's committed or rolled back.
    pub async fn begin_transaction(&self) -> TransactionContext<T, E> {
        let lock = self.inner.locks.lock(None, LockType::Read).await;
        TransactionContext::new(self.clone(), TransactionId::random(), lock)
    }

    /// Closes every open target.
    pub async fn close(&self) {
        self.inner.targets.close_all().await;
    }

    pub(super) async fn invoke_durably<I>(
        &self,
        transaction_id: TransactionId,
        phase: Phase,
        invoker: Arc<I>,
    ) -> Result<I::Output, InvocationError<E>>
    where
        I: Invoker<T, E> + 'static,
    {
        self.inner
            .targets
            .close_inactive(&self.inner.balancer.snapshot())
            .await;
        self.invoke_on_many(Fanout::All, invoker, Some((transaction_id, phase)))
            .await
    }

    async fn invoke_on_many<I>(
        &self,
        fanout: Fanout,
        invoker: Arc<I>,
        durable: Option<(TransactionId, Phase)>,
    ) -> Result<I::Output, InvocationError<E>>
    where
        I: Invoker<T, E> + 'static,
    {
        let inner = &self.inner;
        let snapshot = inner.balancer.snapshot();

        let mut outcomes = BTreeMap::new();
        let mut dispatch = Vec::new();
        for replica in snapshot.iter() {
            match fanout {
                Fanout::All => match inner.targets.get_or_open(replica).await {
                    Ok(target) => dispatch.push((replica.clone(), target)),
                    Err(e) => {
                        outcomes.insert(replica.id().clone(), Outcome::Failure(e));
                    }
                },
                Fanout::Existing => {
                    if let Some(target) = inner.targets.existing(replica.id()) {
                        dispatch.push((replica.clone(), target));
                    }
                }
            }
        }
        if dispatch.is_empty() && outcomes.is_empty() {
            return Err(InvocationError::NoActiveReplicas);
        }

        let invocation = durable.map(|(transaction_id, phase)| InvocationEvent {
            transaction_id,
            phase,
            error_domain: ErrorDomain::Sql,
            comparison: invoker.result_comparison(),
        });
        if let Some(invocation) = &invocation {
            let replicas: Vec<&ReplicaId> = dispatch.iter().map(|(replica, _)| replica.id()).collect();
            self.record_dispatch(invocation, &replicas).await?;
        }

        let mut handles = Vec::with_capacity(dispatch.len());
        for (replica, target) in dispatch {
            let permit = inner
                .permits
                .clone()
                .acquire_owned()
                .await
                .expect("dispatch semaphore is never closed");
            let load = inner.balancer.begin(replica.id());
            let invoker = invoker.clone();
            let replica_id = replica.id().clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let _load = load;
                invoker.invoke(&replica, &target).await
            });
            handles.push((replica_id, handle));
        }

        let deadline = inner.options.timeout.map(|timeout| Instant::now() + timeout);
        for (replica_id, mut handle) in handles {
            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(joined) => Some(joined),
                    Err(_) => {
                        handle.abort();
                        None
                    }
                },
                None => Some(handle.await),
            };
            let outcome = match joined {
                Some(Ok(result)) => Outcome::from(result),
                Some(Err(e)) => {
                    slog::error!(inner.logger, "Invocation on {} was lost: {}", replica_id, e);
                    Outcome::Lost
                }
                None => {
                    slog::warn!(inner.logger, "Invocation on {} timed out", replica_id);
                    Outcome::TimedOut
                }
            };

            if let Some(invocation) = &invocation {
                let event = invoker_event(invocation, &replica_id, outcome.recorded());
                if let Err(e) = inner.durability.after_invoker(&event).await {
                    slog::error!(inner.logger, "Failed to record outcome of {}: {}", replica_id, e);
                }
            }
            outcomes.insert(replica_id, outcome);
        }

        let classifier = inner.classifier.clone();
        let reconciled = reconcile::reconcile(
            outcomes,
            |e: &E| classifier.is_failure(e),
            inner.options.allow_empty,
            snapshot.len(),
            invoker.result_comparison(),
        );
        for (replica_id, reason) in &reconciled.deactivate {
            match reason {
                Reason::Failure => {
                    slog::warn!(inner.logger, "Replica {} failed, deactivating", replica_id)
                }
                Reason::Divergence => slog::error!(
                    inner.logger,
                    "Replica {} is inconsistent with the primary, deactivating",
                    replica_id
                ),
            }
            self.deactivate(replica_id).await;
        }

        if let Some(invocation) = &invocation {
            if let Err(e) = inner.durability.after_invocation(invocation).await {
                slog::error!(
                    inner.logger,
                    "Failed to clear invocation {}: {}",
                    invocation.transaction_id,
                    e
                );
            }
        }

        reconciled.result
    }

    async fn invoke_on_one<I>(&self, selector: Selector, invoker: &I) -> Result<I::Output, InvocationError<E>>
    where
        I: Invoker<T, E>,
    {
        loop {
            let replica = match selector {
                Selector::Next => self.inner.balancer.next(),
                Selector::Primary => self.inner.balancer.primary(),
            }
            .ok_or(InvocationError::NoActiveReplicas)?;

            let outcome = match self.inner.targets.get_or_open(&replica).await {
                Ok(target) => self.invoke_single(&replica, &target, invoker).await,
                Err(e) => Outcome::Failure(e),
            };
            match self.settle(&replica, outcome).await {
                Step::Done(result) => return result,
                Step::Retry => continue,
            }
        }
    }

    async fn invoke_on_any<I>(&self, invoker: &I) -> Result<I::Output, InvocationError<E>>
    where
        I: Invoker<T, E>,
    {
        let snapshot = self.inner.balancer.snapshot();
        for replica in snapshot.iter() {
            let target = match self.inner.targets.existing(replica.id()) {
                Some(target) => target,
                None => continue,
            };
            let outcome = self.invoke_single(replica, &target, invoker).await;
            match self.settle(replica, outcome).await {
                Step::Done(result) => return result,
                Step::Retry => continue,
            }
        }

        self.invoke_on_one(Selector::Next, invoker).await
    }

    async fn invoke_single<I>(&self, replica: &Replica, target: &T, invoker: &I) -> Outcome<I::Output, E>
    where
        I: Invoker<T, E>,
    {
        let _load = self.inner.balancer.begin(replica.id());
        let invocation = invoker.invoke(replica, target);
        match self.inner.options.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, invocation).await {
                Ok(result) => Outcome::from(result),
                Err(_) => {
                    slog::warn!(self.inner.logger, "Invocation on {} timed out", replica.id());
                    Outcome::TimedOut
                }
            },
            None => Outcome::from(invocation.await),
        }
    }

    /// Decides what a single-replica invocation means for the caller: done, or try another
    /// replica because this one failed and is gone now.
    async fn settle<O>(&self, replica: &Replica, outcome: Outcome<O, E>) -> Step<O, E> {
        match outcome {
            Outcome::Success(value) => Step::Done(Ok(value)),
            Outcome::Failure(e) if !self.inner.classifier.is_failure(&e) => {
                Step::Done(Err(InvocationError::Replica(e)))
            }
            failed => {
                slog::warn!(self.inner.logger, "Replica {} failed, deactivating", replica.id());
                if self.deactivate(replica.id()).await || !self.inner.balancer.contains(replica.id()) {
                    Step::Retry
                } else {
                    Step::Done(Err(reconcile::into_error(failed)))
                }
            }
        }
    }

    async fn deactivate(&self, replica_id: &ReplicaId) -> bool {
        let deactivated = self.inner.deactivator.deactivate(replica_id).await;
        if deactivated {
            self.inner.targets.close(replica_id).await;
        }
        deactivated
    }

    /// Records the invocation and every replica it's about to go to. If that fails nothing is
    /// dispatched, so whatever made it to the log is cleared again.
    async fn record_dispatch(
        &self,
        invocation: &InvocationEvent,
        replicas: &[&ReplicaId],
    ) -> Result<(), DurabilityError> {
        let durability = &self.inner.durability;
        durability.before_invocation(invocation).await?;
        for replica_id in replicas {
            let event = invoker_event(invocation, replica_id, InvokerOutcome::Pending);
            if let Err(e) = durability.before_invoker(&event).await {
                if let Err(clear) = durability.after_invocation(invocation).await {
                    slog::error!(self.inner.logger, "Failed to clear invocation {}: {}", invocation.transaction_id, clear);
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

fn invoker_event(invocation: &InvocationEvent, replica_id: &ReplicaId, outcome: InvokerOutcome) -> InvokerEvent {
    InvokerEvent {
        transaction_id: invocation.transaction_id.clone(),
        phase: invocation.phase,
        replica_id: replica_id.clone(),
        outcome,
    }
}
