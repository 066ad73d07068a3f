use crate::database::ReplicaId;
use crate::durability::{DurabilityEvent, PendingInvocations};
use crate::state::membership::{Deactivation, StateCore};
use crate::state::StateError;
use crate::transport::Member;
use std::error::Error;
use std::fmt::Debug;
use tokio::sync::{mpsc, oneshot};

pub(super) fn create(buffer_size: usize, core: StateCore) -> (StateActorClient, StateActor) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let client = StateActorClient { sender: tx };
    let actor = StateActor { receiver: rx, core };

    (client, actor)
}

// Disk interaction is synchronous, same as everywhere else in the actor.
enum Event {
    Activate(ReplicaId, Callback<bool, StateError>),
    Deactivate(ReplicaId, Deactivation, Callback<bool, StateError>),
    Restore(Vec<ReplicaId>, Callback<(), StateError>),
    PersistedActive(Callback<Vec<ReplicaId>, StateError>),

    // Relayed from another member. No response.
    RemoteDurability(Member, DurabilityEvent),

    // Hands back the departed member's in-flight invocations.
    MemberLeft(Member, oneshot::Sender<PendingInvocations>),
}

struct Callback<O: Debug, E: Error>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    pub fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }
}

#[derive(Clone)]
pub(super) struct StateActorClient {
    sender: mpsc::Sender<Event>,
}

impl StateActorClient {
    pub async fn activate(&self, replica_id: ReplicaId) -> Result<bool, StateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Activate(replica_id, Callback(tx))).await;

        rx.await.expect("State actor dropped our channel.")
    }

    pub async fn deactivate(&self, replica_id: ReplicaId, mode: Deactivation) -> Result<bool, StateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Deactivate(replica_id, mode, Callback(tx))).await;

        rx.await.expect("State actor dropped our channel.")
    }

    pub async fn restore(&self, active: Vec<ReplicaId>) -> Result<(), StateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Restore(active, Callback(tx))).await;

        rx.await.expect("State actor dropped our channel.")
    }

    pub async fn persisted_active(&self) -> Result<Vec<ReplicaId>, StateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::PersistedActive(Callback(tx))).await;

        rx.await.expect("State actor dropped our channel.")
    }

    pub async fn remote_durability(&self, member: Member, event: DurabilityEvent) {
        self.send(Event::RemoteDurability(member, event)).await;
    }

    pub async fn member_left(&self, member: Member) -> PendingInvocations {
        let (tx, rx) = oneshot::channel();
        self.send(Event::MemberLeft(member, tx)).await;

        rx.await.expect("State actor dropped our channel.")
    }

    async fn send(&self, event: Event) {
        if self.sender.send(event).await.is_err() {
            panic!("State actor is dead.");
        }
    }
}

/// StateActor serializes every change to the member's state.
pub(super) struct StateActor {
    receiver: mpsc::Receiver<Event>,
    core: StateCore,
}

impl StateActor {
    pub async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
        }
    }

    // This must NOT be async.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Activate(replica_id, callback) => {
                callback.send(self.core.activate(&replica_id));
            }
            Event::Deactivate(replica_id, mode, callback) => {
                callback.send(self.core.deactivate(&replica_id, mode));
            }
            Event::Restore(active, callback) => {
                callback.send(self.core.restore(active));
            }
            Event::PersistedActive(callback) => {
                callback.send(self.core.persisted_active());
            }
            Event::RemoteDurability(member, event) => {
                self.core.remote_durability(member, &event);
            }
            Event::MemberLeft(member, tx) => {
                let _ = tx.send(self.core.member_left(&member));
            }
        }
    }
}
