//! Per-room fan-out to connected peers.
//!
//! Each room owns one tokio broadcast channel. A relayed message carries the
//! id of the connection it came from; receivers skip their own messages, so
//! a sender never sees its own draw or erase come back.
//!
//! Messages are shared as `Arc<Relayed>` and encoded by each receiving
//! connection in that connection's wire format.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// Connection identity inside the relay.
pub type PeerId = Uuid;

/// A message on its way to every peer of a room except `origin`.
#[derive(Debug)]
pub struct Relayed {
    pub origin: PeerId,
    pub message: ServerMessage,
}

impl Relayed {
    /// Whether `peer` should receive this message.
    pub fn is_for(&self, peer: PeerId) -> bool {
        self.origin != peer
    }
}

pub type RelayReceiver = broadcast::Receiver<Arc<Relayed>>;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub active_peers: usize,
}

/// The broadcast group of a single room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Relayed>>,
    peers: HashSet<PeerId>,
    capacity: usize,
    messages_sent: u64,
}

impl BroadcastGroup {
    /// `capacity` is how many messages a slow peer may fall behind before it
    /// starts losing them.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            peers: HashSet::new(),
            capacity,
            messages_sent: 0,
        }
    }

    /// Add a peer and return its receiver. Re-adding a present peer hands out
    /// a fresh receiver.
    pub fn add_peer(&mut self, peer: PeerId) -> RelayReceiver {
        self.peers.insert(peer);
        self.sender.subscribe()
    }

    pub fn remove_peer(&mut self, peer: &PeerId) -> bool {
        self.peers.remove(peer)
    }

    pub fn has_peer(&self, peer: &PeerId) -> bool {
        self.peers.contains(peer)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Send `message` to every subscribed receiver. Returns the receiver
    /// count, including the origin's own receiver (filtered on receipt).
    pub fn broadcast(&mut self, origin: PeerId, message: ServerMessage) -> usize {
        self.messages_sent += 1;
        self.sender
            .send(Arc::new(Relayed { origin, message }))
            .unwrap_or(0)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent,
            active_peers: self.peers.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_remove_peer() {
        let mut group = BroadcastGroup::new(16);
        let peer = Uuid::new_v4();

        let _rx = group.add_peer(peer);
        assert_eq!(group.peer_count(), 1);
        assert!(group.has_peer(&peer));

        assert!(group.remove_peer(&peer));
        assert!(!group.remove_peer(&peer));
        assert_eq!(group.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_fan_out_tags_origin() {
        let mut group = BroadcastGroup::new(16);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let mut rx_alice = group.add_peer(alice);
        let mut rx_bob = group.add_peer(bob);

        let count = group.broadcast(alice, ServerMessage::Pong);
        assert_eq!(count, 2);

        let seen_by_alice = rx_alice.recv().await.unwrap();
        let seen_by_bob = rx_bob.recv().await.unwrap();
        assert!(!seen_by_alice.is_for(alice));
        assert!(seen_by_bob.is_for(bob));
        assert_eq!(seen_by_bob.message, ServerMessage::Pong);
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let mut group = BroadcastGroup::new(16);
        let origin = Uuid::new_v4();
        let mut rx = group.add_peer(Uuid::new_v4());

        group.broadcast(origin, ServerMessage::Pong);
        group.broadcast(origin, ServerMessage::CanvasState(Vec::new()));

        assert_eq!(rx.recv().await.unwrap().message, ServerMessage::Pong);
        assert_eq!(
            rx.recv().await.unwrap().message,
            ServerMessage::CanvasState(Vec::new())
        );
    }

    #[tokio::test]
    async fn test_lagging_receiver() {
        let mut group = BroadcastGroup::new(2);
        let origin = Uuid::new_v4();
        let mut rx = group.add_peer(Uuid::new_v4());

        for _ in 0..5 {
            group.broadcast(origin, ServerMessage::Pong);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_broadcast_without_receivers() {
        let mut group = BroadcastGroup::new(16);
        assert_eq!(group.broadcast(Uuid::new_v4(), ServerMessage::Pong), 0);
        assert_eq!(group.stats().messages_sent, 1);
    }

    #[test]
    fn test_stats_and_capacity() {
        let mut group = BroadcastGroup::new(32);
        let _rx = group.add_peer(Uuid::new_v4());
        group.broadcast(Uuid::new_v4(), ServerMessage::Pong);
        group.broadcast(Uuid::new_v4(), ServerMessage::Pong);

        assert_eq!(
            group.stats(),
            BroadcastStats {
                messages_sent: 2,
                active_peers: 1
            }
        );
        assert_eq!(group.capacity(), 32);
    }
}
