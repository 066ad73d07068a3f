mod durability;
mod event;
mod log;
mod pending;
mod record;
mod recovery;

pub use self::durability::Durability;
pub use self::durability::DurabilityError;
pub use self::durability::DurabilityLevel;
pub use self::durability::DurabilityListener;
pub use self::log::LocalDurabilityLog;
pub use event::DurabilityEvent;
pub use event::ErrorDomain;
pub use event::InvocationEvent;
pub use event::InvokerEvent;
pub use event::InvokerOutcome;
pub use event::Phase;
pub use event::RecordedValue;
pub use event::ResultComparison;
pub use event::TransactionId;
pub use pending::PendingInvocation;
pub use pending::PendingInvocations;
pub use recovery::replicas_to_deactivate;
