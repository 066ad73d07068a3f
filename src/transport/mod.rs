mod command;
mod local;
mod member;
mod transport;

pub use command::Command;
pub use command::LockCommand;
pub use command::Response;
pub use command::StateCommand;
pub use local::LocalGroup;
pub use local::LocalTransport;
pub use member::Member;
pub use transport::GroupReceiver;
pub use transport::GroupTransport;
pub use transport::TransportError;
