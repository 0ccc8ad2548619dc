//! In-memory message store.
//!
//! Backs unit tests and the broker's default (non-durable) mode. One vec
//! under a lock is plenty at chat scale, and taking the write lock for the
//! whole of append is what makes the timestamp clamp and the push atomic
//! together.

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::conversation::{normalize_email, ChatMessage, ConversationKey, MessageDraft};
use crate::error::Result;
use crate::time;

use super::{InboxMap, MessageStore};

/// Message store kept entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<ChatMessage>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted messages across all conversations.
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    /// Whether the store holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn fetch_history(&self, key: &ConversationKey) -> Result<Vec<ChatMessage>> {
        let messages = self.messages.read();
        let mut history: Vec<ChatMessage> = messages
            .iter()
            .filter(|message| key.matches(message))
            .cloned()
            .collect();
        history.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(history)
    }

    async fn append(&self, draft: MessageDraft) -> Result<ChatMessage> {
        let draft = draft.validated()?;
        let key = draft.key();

        let mut messages = self.messages.write();
        let last = messages
            .iter()
            .rev()
            .find(|message| key.matches(message))
            .map(|message| message.created_at);

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            listing_id: draft.listing_id,
            sender: draft.sender,
            buyer_email: draft.buyer_email,
            seller_email: draft.seller_email,
            body: draft.body,
            created_at: time::monotonic_millis(last),
        };
        messages.push(message.clone());
        Ok(message)
    }

    async fn conversations_for_seller(&self, seller_email: &str) -> Result<InboxMap> {
        let seller = normalize_email(seller_email);
        let mut inbox = InboxMap::new();
        for message in self
            .messages
            .read()
            .iter()
            .filter(|message| message.seller_email == seller)
        {
            inbox
                .entry(message.listing_id.clone())
                .or_default()
                .insert(message.buyer_email.clone());
        }
        Ok(inbox)
    }
}
