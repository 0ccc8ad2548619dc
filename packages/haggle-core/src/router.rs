//! Topic routing for live delivery.
//!
//! The router maps derived subscription addresses to the outbound channels
//! of currently-connected subscribers. Delivery is exact-address only: a
//! published message reaches the connections subscribed to that one address
//! and nobody else; there is no broadcast path.
//!
//! Presence is not part of the contract. Publishing to an address with no
//! subscribers is not an error — the recipient is offline and will catch up
//! from the message store on its next history fetch; no duplicate live
//! delivery happens later.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::conversation::ChatMessage;
use crate::protocol::ServerMessage;

/// A subscriber's outbound channel.
pub type Subscriber = mpsc::UnboundedSender<ServerMessage>;

/// Delivers published messages to live subscribers, keyed by address.
///
/// Cloning is cheap; all clones share one subscription table.
#[derive(Clone, Default)]
pub struct TopicRouter {
    /// address → (connection id → outbound channel)
    subscriptions: Arc<DashMap<String, HashMap<Uuid, Subscriber>>>,
}

impl TopicRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` as a subscriber on `address`.
    ///
    /// At most one subscription exists per (connection, address):
    /// re-subscribing replaces the previous channel rather than adding a
    /// second delivery path, so a reconnecting session can never end up
    /// receiving duplicates through a stale registration.
    pub fn subscribe(&self, conn: Uuid, address: &str, sender: Subscriber) {
        let mut subs = self.subscriptions.entry(address.to_string()).or_default();
        let replaced = subs.insert(conn, sender).is_some();
        tracing::debug!(conn = %conn, address, replaced, "Subscribed");
    }

    /// Remove one (connection, address) subscription.
    pub fn unsubscribe(&self, conn: Uuid, address: &str) {
        if let Some(mut subs) = self.subscriptions.get_mut(address) {
            subs.remove(&conn);
        }
        self.subscriptions.remove_if(address, |_, subs| subs.is_empty());
    }

    /// Release every subscription held by a closing connection.
    pub fn drop_connection(&self, conn: Uuid) {
        self.subscriptions.retain(|_, subs| {
            subs.remove(&conn);
            !subs.is_empty()
        });
    }

    /// Deliver one persisted message to every subscriber of `address`.
    ///
    /// Fire-and-forget from the caller's perspective: the return value is
    /// how many subscribers received it, and zero simply means nobody is
    /// listening right now. Channels whose receiving side is gone are
    /// pruned on the way through. Within one subscriber, deliveries arrive
    /// in publish order (the outbound channel is FIFO).
    pub fn publish(&self, address: &str, message: &ChatMessage) -> usize {
        let mut delivered = 0;
        if let Some(mut subs) = self.subscriptions.get_mut(address) {
            subs.retain(|conn, sender| {
                let live = sender
                    .send(ServerMessage::Message {
                        message: message.clone(),
                    })
                    .is_ok();
                if live {
                    delivered += 1;
                } else {
                    tracing::debug!(conn = %conn, address, "Pruned dead subscriber");
                }
                live
            });
        }
        self.subscriptions.remove_if(address, |_, subs| subs.is_empty());
        delivered
    }

    /// Whether any connection is currently subscribed to `address`.
    pub fn has_subscriber(&self, address: &str) -> bool {
        self.subscriptions
            .get(address)
            .map_or(false, |subs| !subs.is_empty())
    }

    /// Number of distinct addresses with at least one subscriber.
    pub fn address_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Total number of (connection, address) subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.iter().map(|subs| subs.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(body: &str) -> ChatMessage {
        ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            listing_id: "L1".to_string(),
            sender: "a@x.com".to_string(),
            buyer_email: "a@x.com".to_string(),
            seller_email: "b@x.com".to_string(),
            body: body.to_string(),
            created_at: 1_700_000_000_000,
        }
    }

    fn recv_body(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> String {
        match rx.try_recv().unwrap() {
            ServerMessage::Message { message } => message.body,
            other => panic!("Expected Message, got {:?}", other),
        }
    }

    #[test]
    fn test_publish_reaches_exact_address_only() {
        let router = TopicRouter::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        router.subscribe(Uuid::new_v4(), "chat/L1/a%40x.com", tx_a);
        router.subscribe(Uuid::new_v4(), "chat/L1/b%40x.com", tx_b);

        let delivered = router.publish("chat/L1/a%40x.com", &delivery("hello"));
        assert_eq!(delivered, 1);
        assert_eq!(recv_body(&mut rx_a), "hello");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_publish_to_empty_address_is_not_an_error() {
        let router = TopicRouter::new();
        let delivered = router.publish("chat/L1/nobody%40x.com", &delivery("hello"));
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_resubscribe_replaces_rather_than_duplicates() {
        let router = TopicRouter::new();
        let conn = Uuid::new_v4();
        let (tx_old, mut rx_old) = mpsc::unbounded_channel();
        let (tx_new, mut rx_new) = mpsc::unbounded_channel();

        router.subscribe(conn, "chat/L1/a%40x.com", tx_old);
        router.subscribe(conn, "chat/L1/a%40x.com", tx_new);
        assert_eq!(router.subscription_count(), 1);

        let delivered = router.publish("chat/L1/a%40x.com", &delivery("once"));
        assert_eq!(delivered, 1);
        assert_eq!(recv_body(&mut rx_new), "once");
        assert!(rx_old.try_recv().is_err());
    }

    #[test]
    fn test_multiple_connections_share_an_address() {
        let router = TopicRouter::new();
        let (tx_1, mut rx_1) = mpsc::unbounded_channel();
        let (tx_2, mut rx_2) = mpsc::unbounded_channel();

        router.subscribe(Uuid::new_v4(), "chat/L1/b%40x.com", tx_1);
        router.subscribe(Uuid::new_v4(), "chat/L1/b%40x.com", tx_2);

        let delivered = router.publish("chat/L1/b%40x.com", &delivery("both"));
        assert_eq!(delivered, 2);
        assert_eq!(recv_body(&mut rx_1), "both");
        assert_eq!(recv_body(&mut rx_2), "both");
    }

    #[test]
    fn test_deliveries_preserve_publish_order() {
        let router = TopicRouter::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.subscribe(Uuid::new_v4(), "chat/L1/a%40x.com", tx);

        router.publish("chat/L1/a%40x.com", &delivery("first"));
        router.publish("chat/L1/a%40x.com", &delivery("second"));
        router.publish("chat/L1/a%40x.com", &delivery("third"));

        assert_eq!(recv_body(&mut rx), "first");
        assert_eq!(recv_body(&mut rx), "second");
        assert_eq!(recv_body(&mut rx), "third");
    }

    #[test]
    fn test_unsubscribe_removes_single_pair() {
        let router = TopicRouter::new();
        let conn = Uuid::new_v4();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        router.subscribe(conn, "chat/L1/a%40x.com", tx_a);
        router.subscribe(conn, "chat/L2/a%40x.com", tx_b);

        router.unsubscribe(conn, "chat/L1/a%40x.com");
        assert!(!router.has_subscriber("chat/L1/a%40x.com"));
        assert_eq!(router.address_count(), 1);

        router.publish("chat/L2/a%40x.com", &delivery("still here"));
        assert_eq!(recv_body(&mut rx_b), "still here");
    }

    #[test]
    fn test_drop_connection_releases_every_subscription() {
        let router = TopicRouter::new();
        let closing = Uuid::new_v4();
        let staying = Uuid::new_v4();
        let (tx_1, _rx_1) = mpsc::unbounded_channel();
        let (tx_2, _rx_2) = mpsc::unbounded_channel();
        let (tx_3, mut rx_3) = mpsc::unbounded_channel();

        router.subscribe(closing, "chat/L1/a%40x.com", tx_1);
        router.subscribe(closing, "chat/L2/a%40x.com", tx_2);
        router.subscribe(staying, "chat/L1/a%40x.com", tx_3);

        router.drop_connection(closing);
        assert_eq!(router.subscription_count(), 1);
        assert_eq!(router.address_count(), 1);

        let delivered = router.publish("chat/L1/a%40x.com", &delivery("survivor"));
        assert_eq!(delivered, 1);
        assert_eq!(recv_body(&mut rx_3), "survivor");
    }

    #[test]
    fn test_dead_channels_are_pruned_on_publish() {
        let router = TopicRouter::new();
        let (tx, rx) = mpsc::unbounded_channel();
        router.subscribe(Uuid::new_v4(), "chat/L1/a%40x.com", tx);
        drop(rx);

        let delivered = router.publish("chat/L1/a%40x.com", &delivery("lost"));
        assert_eq!(delivered, 0);
        assert_eq!(router.subscription_count(), 0);
        assert_eq!(router.address_count(), 0);
    }
}
