//! Broker state management.
//!
//! Tracks registered connections and owns the persist-then-fan-out publish
//! pipeline. Connection tracking uses DashMap for lock-free access; the
//! fan-out registry itself lives in [`TopicRouter`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use haggle_core::conversation::{ChatMessage, MessageDraft};
use haggle_core::router::TopicRouter;
use haggle_core::store::MessageStore;
use haggle_core::Result;

/// Default port the broker listens on.
pub const DEFAULT_PORT: u16 = 4870;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub port: u16,
    pub bind: String,
    /// SQLite database path; messages live in memory when None
    pub db_path: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: "0.0.0.0".to_string(),
            db_path: None,
        }
    }
}

/// Shared broker state.
#[derive(Clone)]
pub struct BrokerState {
    /// Durable message store; every publish goes through it before fan-out.
    pub store: Arc<dyn MessageStore>,

    /// Address → live subscribers.
    pub router: TopicRouter,

    /// Connection id → registered email.
    /// A connection appears here once it has registered and disappears on
    /// disconnect.
    pub connections: Arc<DashMap<Uuid, String>>,

    /// Server configuration.
    pub config: BrokerConfig,

    /// When this broker instance started.
    pub started_at: DateTime<Utc>,
}

impl BrokerState {
    /// Create broker state over the given store.
    pub fn new(config: BrokerConfig, store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            router: TopicRouter::new(),
            connections: Arc::new(DashMap::new()),
            config,
            started_at: Utc::now(),
        }
    }

    // ── Connection Management ─────────────────────────────────────────────

    /// Associate a connection with its registered email.
    pub fn register_connection(&self, conn: Uuid, email: &str) {
        tracing::info!(conn = %conn, email = email, "Connection registered");
        self.connections.insert(conn, email.to_string());
    }

    /// Drop a connection: forget its identity and all its subscriptions.
    pub fn unregister_connection(&self, conn: Uuid) {
        self.connections.remove(&conn);
        self.router.drop_connection(conn);
        tracing::info!(conn = %conn, "Connection unregistered");
    }

    /// The email a connection registered with, if any.
    pub fn registered_email(&self, conn: Uuid) -> Option<String> {
        self.connections.get(&conn).map(|entry| entry.value().clone())
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // ── Publish Pipeline ──────────────────────────────────────────────────

    /// Persist one draft and fan the stored record out to both
    /// participants' addresses.
    ///
    /// This is the single write path: WebSocket publishes and REST appends
    /// both land here, so a message is never delivered live without having
    /// been persisted first. The sender's own subscription receives the
    /// echo carrying the store-assigned id and timestamp.
    pub async fn publish_message(&self, draft: MessageDraft) -> Result<ChatMessage> {
        let message = self.store.append(draft).await?;

        let (buyer_address, seller_address) = message.key().addresses();
        let mut delivered = self.router.publish(&buyer_address, &message);
        if seller_address != buyer_address {
            delivered += self.router.publish(&seller_address, &message);
        }

        tracing::debug!(
            id = message.id.as_str(),
            listing_id = message.listing_id.as_str(),
            delivered,
            "Message published"
        );
        Ok(message)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
