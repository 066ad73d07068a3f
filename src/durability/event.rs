use crate::database::ReplicaId;
use bytes::Bytes;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// TransactionId identifies one logical multi-replica invocation across the cluster. Every
/// member generates its own, so it has to be unique without coordination.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TransactionId(Bytes);

impl TransactionId {
    pub fn random() -> Self {
        let mut id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut id);
        TransactionId(Bytes::copy_from_slice(&id))
    }

    pub fn from_bytes(id: impl Into<Bytes>) -> Self {
        TransactionId(id.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Phase of the invocation being made durable. Plain statements and local commits use
/// Commit/Rollback; Prepare/Forget come from two-phase commit.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Phase {
    Prepare,
    Commit,
    Rollback,
    Forget,
}

impl Phase {
    pub(super) fn code(&self) -> u8 {
        match self {
            Phase::Prepare => 1,
            Phase::Commit => 2,
            Phase::Rollback => 3,
            Phase::Forget => 4,
        }
    }

    pub(super) fn from_code(code: u8) -> Option<Phase> {
        match code {
            1 => Some(Phase::Prepare),
            2 => Some(Phase::Commit),
            3 => Some(Phase::Rollback),
            4 => Some(Phase::Forget),
            _ => None,
        }
    }
}

/// Kind of error the invocation raises: ordinary statement errors or two-phase commit errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    Sql,
    Xa,
}

/// Whether replica results of an operation can be compared for equality. Results that are
/// inherently different on every replica (generated keys, timestamps) must opt out, otherwise
/// every invocation would look like divergence.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultComparison {
    Compare,
    /// Only the kind of outcome (success or failure) is compared.
    Ignore,
}

impl Default for ResultComparison {
    fn default() -> Self {
        ResultComparison::Compare
    }
}

/// InvocationEvent is recorded when a multi-replica invocation begins and cleared when all of
/// its per-replica outcomes are resolved.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvocationEvent {
    pub transaction_id: TransactionId,
    pub phase: Phase,
    pub error_domain: ErrorDomain,
    pub comparison: ResultComparison,
}

/// InvokerEvent records one replica's part of an invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvokerEvent {
    pub transaction_id: TransactionId,
    pub phase: Phase,
    pub replica_id: ReplicaId,
    pub outcome: InvokerOutcome,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokerOutcome {
    /// Dispatched, no outcome known yet.
    Pending,
    Success(RecordedValue),
    Failure(RecordedValue),
}

impl InvokerOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, InvokerOutcome::Pending)
    }
}

/// A replica result or error in a form that can be stored, shipped to other members and
/// compared after a crash.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RecordedValue(pub serde_json::Value);

impl RecordedValue {
    pub fn of<T: Serialize>(value: &T) -> Self {
        RecordedValue(serde_json::to_value(value).unwrap_or(serde_json::Value::Null))
    }

    /// Errors are recorded by their message, which is what recovery compares.
    pub fn of_error<E: fmt::Display>(error: &E) -> Self {
        RecordedValue(serde_json::Value::String(error.to_string()))
    }
}

/// Every event the durability log and its listeners deal with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DurabilityEvent {
    BeforeInvocation(InvocationEvent),
    AfterInvocation(InvocationEvent),
    BeforeInvoker(InvokerEvent),
    AfterInvoker(InvokerEvent),
}

impl DurabilityEvent {
    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            DurabilityEvent::BeforeInvocation(e) | DurabilityEvent::AfterInvocation(e) => &e.transaction_id,
            DurabilityEvent::BeforeInvoker(e) | DurabilityEvent::AfterInvoker(e) => &e.transaction_id,
        }
    }
}
