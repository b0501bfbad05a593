//! Connected clients and event delivery.
//!
//! Each control-channel connection registers here and receives events
//! through an unbounded channel. Senders whose receiver is gone are pruned on
//! the next broadcast.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};

use harbor_core::ControlEvent;

/// Opaque handle of a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

#[cfg(test)]
impl ClientId {
    pub(crate) fn for_tests(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

struct ClientSlot {
    sender: mpsc::UnboundedSender<ControlEvent>,
    controlled: bool,
}

/// Registry of connected clients.
pub struct ClientRegistry {
    next_id: AtomicU64,
    clients: RwLock<HashMap<ClientId, ClientSlot>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), clients: RwLock::new(HashMap::new()) }
    }

    /// Register a client. It is not controlled until the next claim.
    pub async fn connect(&self) -> (ClientId, mpsc::UnboundedReceiver<ControlEvent>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.clients
            .write()
            .await
            .insert(id, ClientSlot { sender, controlled: false });
        tracing::debug!("{} connected", id);
        (id, receiver)
    }

    pub async fn disconnect(&self, id: ClientId) {
        if self.clients.write().await.remove(&id).is_some() {
            tracing::debug!("{} disconnected", id);
        }
    }

    /// Take control of every connected client.
    ///
    /// Returns how many clients were newly claimed.
    pub async fn claim(&self) -> usize {
        let mut clients = self.clients.write().await;
        let mut claimed = 0;
        for slot in clients.values_mut() {
            if !slot.controlled {
                slot.controlled = true;
                claimed += 1;
            }
        }
        claimed
    }

    pub async fn is_controlled(&self, id: ClientId) -> bool {
        self.clients.read().await.get(&id).is_some_and(|slot| slot.controlled)
    }

    /// Deliver an event to every connected client.
    ///
    /// Returns the number of clients reached.
    pub async fn broadcast(&self, event: &ControlEvent) -> usize {
        let mut clients = self.clients.write().await;
        clients.retain(|id, slot| {
            let alive = slot.sender.send(event.clone()).is_ok();
            if !alive {
                tracing::debug!("dropping {}: receiver closed", id);
            }
            alive
        });
        clients.len()
    }

    /// Deliver an event to one client.
    pub async fn post(&self, id: ClientId, event: ControlEvent) -> bool {
        match self.clients.read().await.get(&id) {
            Some(slot) => slot.sender.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let registry = ClientRegistry::new();
        let (_, mut a) = registry.connect().await;
        let (_, mut b) = registry.connect().await;

        let event = ControlEvent::VersionInfo { version: None };
        assert_eq!(registry.broadcast(&event).await, 2);
        assert_eq!(a.recv().await, Some(event.clone()));
        assert_eq!(b.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_broadcast_prunes_closed_receivers() {
        let registry = ClientRegistry::new();
        let (_, a) = registry.connect().await;
        let (_, _b) = registry.connect().await;
        drop(a);

        assert_eq!(registry.broadcast(&ControlEvent::VersionInfo { version: None }).await, 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_post_targets_one_client() {
        let registry = ClientRegistry::new();
        let (a_id, mut a) = registry.connect().await;
        let (_, mut b) = registry.connect().await;

        assert!(registry.post(a_id, ControlEvent::VersionInfo { version: None }).await);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_err());

        registry.disconnect(a_id).await;
        assert!(!registry.post(a_id, ControlEvent::VersionInfo { version: None }).await);
    }

    #[tokio::test]
    async fn test_claim_marks_connected_clients() {
        let registry = ClientRegistry::new();
        let (a, _rx_a) = registry.connect().await;
        assert!(!registry.is_controlled(a).await);

        assert_eq!(registry.claim().await, 1);
        assert!(registry.is_controlled(a).await);
        assert_eq!(registry.claim().await, 0);

        let (b, _rx_b) = registry.connect().await;
        assert!(!registry.is_controlled(b).await);
    }
}
