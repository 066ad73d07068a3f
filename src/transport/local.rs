use crate::transport::{Command, GroupReceiver, GroupTransport, Member, Response, TransportError};
use std::sync::{Arc, Mutex, Weak};
use tokio::time::Duration;

/// LocalGroup is a process-local group: members are transports created by `join()` and
/// commands are delivered by calling the addressee's receiver directly. The oldest member is the
/// coordinator.
///
/// It is a complete `GroupTransport` for single-process deployments and for tests that need
/// several members.
#[derive(Clone, Default)]
pub struct LocalGroup {
    state: Arc<Mutex<GroupState>>,
}

#[derive(Default)]
struct GroupState {
    // In join order.
    members: Vec<Slot>,
}

struct Slot {
    member: Member,
    receiver: Option<Weak<dyn GroupReceiver>>,
}

impl LocalGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member and tells everybody already in the group about it.
    pub async fn join(&self, name: &str) -> Arc<LocalTransport> {
        let member = Member::new(name);
        let others = {
            let mut state = self.lock();
            let others = state.receivers();
            state.members.push(Slot {
                member: member.clone(),
                receiver: None,
            });
            others
        };

        for (_, receiver) in others {
            receiver.member_joined(member.clone()).await;
        }

        Arc::new(LocalTransport {
            group: self.clone(),
            member,
        })
    }

    /// Removes a member, as if its process died, and tells the remaining members.
    pub async fn leave(&self, member: &Member) {
        let remaining = {
            let mut state = self.lock();
            state.members.retain(|slot| &slot.member != member);
            state.receivers()
        };

        for (_, receiver) in remaining {
            receiver.member_left(member.clone()).await;
        }
    }

    pub fn members(&self) -> Vec<Member> {
        self.lock().members.iter().map(|slot| slot.member.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GroupState> {
        self.state.lock().expect("LocalGroup mutex guard poison")
    }
}

impl GroupState {
    fn receivers(&self) -> Vec<(Member, Arc<dyn GroupReceiver>)> {
        self.members
            .iter()
            .filter_map(|slot| {
                let receiver = slot.receiver.as_ref()?.upgrade()?;
                Some((slot.member.clone(), receiver))
            })
            .collect()
    }

    fn receiver_of(&self, member: &Member) -> Option<Arc<dyn GroupReceiver>> {
        self.members
            .iter()
            .find(|slot| &slot.member == member)
            .and_then(|slot| slot.receiver.as_ref())
            .and_then(|receiver| receiver.upgrade())
    }
}

/// LocalTransport is one member's handle on a `LocalGroup`.
pub struct LocalTransport {
    group: LocalGroup,
    member: Member,
}

impl LocalTransport {
    pub fn group(&self) -> &LocalGroup {
        &self.group
    }
}

#[async_trait::async_trait]
impl GroupTransport for LocalTransport {
    fn local_member(&self) -> Member {
        self.member.clone()
    }

    fn coordinator(&self) -> Member {
        self.group
            .lock()
            .members
            .first()
            .map(|slot| slot.member.clone())
            .unwrap_or_else(|| self.member.clone())
    }

    fn members(&self) -> Vec<Member> {
        self.group.members()
    }

    async fn send(&self, to: &Member, command: Command, timeout: Option<Duration>) -> Result<Response, TransportError> {
        let receiver = self
            .group
            .lock()
            .receiver_of(to)
            .ok_or_else(|| TransportError::Unreachable(to.clone()))?;

        let handling = receiver.handle(self.member.clone(), command);
        let response = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, handling)
                .await
                .map_err(|_| TransportError::TimedOut(to.clone()))?,
            None => handling.await,
        };

        match response {
            Response::Rejected(reason) => Err(TransportError::Rejected {
                member: to.clone(),
                reason,
            }),
            response => Ok(response),
        }
    }

    fn set_receiver(&self, receiver: Weak<dyn GroupReceiver>) {
        let mut state = self.group.lock();
        if let Some(slot) = state.members.iter_mut().find(|slot| slot.member == self.member) {
            slot.receiver = Some(receiver);
        }
    }
}
