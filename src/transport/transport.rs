use crate::transport::{Command, Member, Response};
use std::sync::Weak;
use tokio::time::Duration;

/// GroupTransport is the group communication layer: it knows the members, agrees with them on
/// who the coordinator is, and delivers commands between them.
#[async_trait::async_trait]
pub trait GroupTransport: Send + Sync {
    fn local_member(&self) -> Member;

    /// Every member sees the same coordinator, modulo membership changes in flight.
    fn coordinator(&self) -> Member;

    /// Current members, including the local one.
    fn members(&self) -> Vec<Member>;

    async fn send(&self, to: &Member, command: Command, timeout: Option<Duration>) -> Result<Response, TransportError>;

    /// Sends `command` to every member not in `excluded`, the local member included, and
    /// collects every response.
    async fn send_all(&self, command: Command, excluded: &[Member]) -> Vec<(Member, Result<Response, TransportError>)> {
        let targets: Vec<Member> = self
            .members()
            .into_iter()
            .filter(|member| !excluded.contains(member))
            .collect();

        let responses = futures::future::join_all(targets.iter().map(|member| self.send(member, command.clone(), None))).await;

        targets.into_iter().zip(responses).collect()
    }

    /// Installs the handler for commands addressed to the local member and for membership
    /// changes. Held weakly; the owner of the receiver keeps it alive.
    fn set_receiver(&self, receiver: Weak<dyn GroupReceiver>);
}

/// GroupReceiver is the local member's side of the group.
#[async_trait::async_trait]
pub trait GroupReceiver: Send + Sync {
    async fn handle(&self, from: Member, command: Command) -> Response;

    async fn member_joined(&self, member: Member);

    async fn member_left(&self, member: Member);
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Member {0} is unreachable")]
    Unreachable(Member),

    #[error("Member {0} did not respond in time")]
    TimedOut(Member),

    #[error("Member {member} rejected command: {reason}")]
    Rejected { member: Member, reason: String },
}
