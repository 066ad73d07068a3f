mod auto_activation;
mod failure_detection;
mod scheduler;
mod time;

pub use auto_activation::AutoActivationTask;
pub use auto_activation::ReplicaActivator;
pub use failure_detection::probe;
pub use failure_detection::FailureDetectionTask;
pub use scheduler::ScheduledTask;
pub use scheduler::Scheduler;
pub use scheduler::SchedulerGate;
pub use time::mocked_clock;
pub use time::Clock;
pub use time::MockClock;
pub use time::MockClockController;
pub use time::RealClock;
