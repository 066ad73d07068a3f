use crate::database::ReplicaId;
use crate::durability::DurabilityEvent;
use crate::lock::LockDescriptor;
use tokio::time::Duration;

/// Command is everything members ask of each other.
#[derive(Clone, Debug)]
pub enum Command {
    Lock(LockCommand),
    State(StateCommand),
}

#[derive(Clone, Debug)]
pub enum LockCommand {
    /// Sent to the coordinator only. The coordinator takes its own local lock (waiting at most
    /// `timeout`) on behalf of the sender.
    AcquireCoordinator {
        descriptor: LockDescriptor,
        timeout: Duration,
    },
    /// Take the lock without waiting. Answered with `Response::Locked`.
    Acquire { descriptor: LockDescriptor },
    Release { descriptor: LockDescriptor },
}

#[derive(Clone, Debug)]
pub enum StateCommand {
    Activate(ReplicaId),
    Deactivate(ReplicaId),
    /// Asks for the active replica set. Answered with `Response::ActiveReplicas`.
    ActiveReplicas,
    /// One of the sender's durability events, relayed so that receivers can recover on the
    /// sender's behalf should it leave.
    Durability(DurabilityEvent),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    Ack,
    Locked(bool),
    ActiveReplicas(Vec<ReplicaId>),
    /// The receiver can't serve this command (e.g. not started yet).
    Rejected(String),
}
