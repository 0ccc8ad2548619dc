//! # Message Store
//!
//! The durable append-only log of chat messages, behind one trait with
//! three implementations:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      MessageStore (trait)                    │
//! ├──────────────┬───────────────────────┬───────────────────────┤
//! │ MemoryStore  │ SqliteStore           │ HttpStore             │
//! │ tests, dev   │ broker durable mode   │ client → broker REST  │
//! └──────────────┴───────────────────────┴───────────────────────┘
//! ```
//!
//! The store is the single authority for durability and the single source
//! of truth for display order. Everything the subsystem ever writes goes
//! through [`MessageStore::append`]; there is no update and no delete.

mod http;
mod memory;
mod sqlite;

pub use http::HttpStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::conversation::{ChatMessage, ConversationKey, MessageDraft};
use crate::error::Result;

/// Seller inbox mapping: listing id → distinct counterpart emails,
/// both levels deterministically ordered.
pub type InboxMap = BTreeMap<String, BTreeSet<String>>;

/// Contract between the chat core and whatever persists its messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// All messages of one conversation, ascending by `created_at` with
    /// (sender, id) breaking ties.
    ///
    /// Idempotent and safe to call repeatedly (a session re-fetches on
    /// every reconnect). No prior messages is an empty vec, not an error.
    async fn fetch_history(&self, key: &ConversationKey) -> Result<Vec<ChatMessage>>;

    /// Validate, normalize, and durably append one draft.
    ///
    /// Assigns the store id and the server timestamp; the timestamp
    /// strictly increases within a conversation. The append is atomic per
    /// message — a concurrent `fetch_history` sees either the whole record
    /// or nothing — and has completed durably before this returns. Fails
    /// with [`crate::Error::Validation`] for blank bodies, missing
    /// participants, or a sender who is not one of the two participants.
    async fn append(&self, draft: MessageDraft) -> Result<ChatMessage>;

    /// Every listing on which this seller has exchanged messages, with the
    /// distinct buyers per listing.
    ///
    /// Covers only conversations where the address is the seller side;
    /// conversations where it appears as buyer or not at all are excluded.
    async fn conversations_for_seller(&self, seller_email: &str) -> Result<InboxMap>;
}
