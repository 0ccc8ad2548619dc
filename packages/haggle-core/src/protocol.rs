//! Chat wire protocol definitions.
//!
//! The broker speaks a simple JSON-over-WebSocket protocol. Client and
//! server share these exact types, so the two sides cannot drift: a session
//! encodes [`ClientMessage`] and decodes [`ServerMessage`], the relay does
//! the reverse.
//!
//! A connection registers its identity first, then subscribes to its own
//! per-listing address and publishes drafts. The broker persists every
//! publish before fan-out, and live deliveries carry the full persisted
//! record — including the copy echoed back to the sender, which is where
//! the sender learns its message's store-assigned id and timestamp.

use serde::{Deserialize, Serialize};

use crate::conversation::{ChatMessage, Role};

// ── Client → Broker ──────────────────────────────────────────────────────────

/// Messages sent from a chat client to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Present this connection's already-authenticated identity.
    /// Must be sent first after connecting; everything else is rejected
    /// until the broker has acknowledged it.
    Register {
        /// The connection's authenticated email
        email: String,
    },

    /// Subscribe to the connection's own address for one listing.
    /// The broker derives the address from the registered email — a
    /// connection can never subscribe to somebody else's channel.
    Subscribe {
        /// The listing whose channel to join
        listing_id: String,
    },

    /// Publish one message into a conversation.
    ///
    /// The sender is the registered connection identity, never a field the
    /// client chooses per message; the broker resolves the conversation key
    /// from (registered email, counterpart, role), persists, then fans out
    /// to both participants' addresses.
    Publish {
        /// The listing the conversation is about
        listing_id: String,
        /// The other participant's email
        counterpart_email: String,
        /// Which side of the conversation the sender is on
        role: Role,
        /// Message text
        body: String,
    },

    /// Ping to keep the connection alive.
    Ping,
}

// ── Broker → Client ──────────────────────────────────────────────────────────

/// Messages sent from the broker to a chat client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledgement of successful registration.
    Registered {
        /// The normalized identity the broker registered
        email: String,
    },

    /// Acknowledgement of a subscription, echoing the derived address.
    Subscribed {
        /// The derived `chat/{listing}/{email}` address
        address: String,
    },

    /// A live delivery: one persisted message addressed to this connection.
    /// Senders receive their own messages through this same variant.
    Message {
        /// The persisted record, with store-assigned id and timestamp
        message: ChatMessage,
    },

    /// A publish was persisted; `id` is the store-assigned message id.
    Ack {
        /// Store-assigned id of the persisted message
        id: String,
    },

    /// Pong response to keep the connection alive.
    Pong,

    /// Error response.
    Error {
        /// Human-readable description of what was rejected
        message: String,
    },
}
