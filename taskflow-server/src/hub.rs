//! Realtime fan-out hub: delivers task events to connected clients.
//!
//! The hub keeps a registry of subscribers, each bound to the owner
//! identity it authenticated as. `publish` delivers an event to every
//! subscriber of that owner and nobody else: ownership scoping is a
//! property of the hub itself, not something clients filter for. Sends
//! are fire-and-forget pushes into per-connection channels, so a slow
//! or dead socket never stalls the publishing mutation.

use std::collections::HashMap;

use taskflow_proto::task::OwnerId;
use taskflow_proto::wire::{ServerMessage, TaskEvent};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Handle identifying one subscription, returned by [`SyncHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

/// One connected client's event channel and its authenticated owner.
struct Subscriber {
    owner: OwnerId,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

/// Registry of connected clients with owner-scoped event delivery.
///
/// Delivery is at-most-once per currently-connected subscriber and
/// best-effort: clients that are disconnected at publish time receive
/// nothing and re-sync from the connect-time snapshot instead.
pub struct SyncHub {
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
}

impl Default for SyncHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a connection's event channel under its verified owner.
    pub async fn subscribe(
        &self,
        owner: OwnerId,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> SubscriberId {
        let id = SubscriberId(Uuid::now_v7());
        let mut subs = self.subscribers.write().await;
        subs.insert(id, Subscriber { owner, sender });
        id
    }

    /// Removes a subscription, returning `true` if it existed.
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subs = self.subscribers.write().await;
        subs.remove(&id).is_some()
    }

    /// Delivers an event to every subscriber of `owner`.
    ///
    /// A send into a closed channel means the connection is tearing
    /// down; the failure is swallowed and cleanup happens in the
    /// connection's own unsubscribe path. Publishing never blocks and
    /// never fails the originating mutation.
    pub async fn publish(&self, owner: &OwnerId, event: &TaskEvent) {
        let subs = self.subscribers.read().await;
        for sub in subs.values() {
            if sub.owner != *owner {
                continue;
            }
            if sub
                .sender
                .send(ServerMessage::Event(event.clone()))
                .is_err()
            {
                tracing::debug!(owner = %owner, "dropping event for disconnected subscriber");
            }
        }
    }

    /// Returns how many subscribers are registered for `owner`.
    pub async fn subscriber_count(&self, owner: &OwnerId) -> usize {
        let subs = self.subscribers.read().await;
        subs.values().filter(|s| s.owner == *owner).count()
    }
}
