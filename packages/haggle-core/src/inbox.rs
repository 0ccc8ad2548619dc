//! Seller inbox aggregation.
//!
//! A seller fields inquiries from many buyers across many listings, one
//! conversation per (listing, buyer) pair. The [`Inbox`] groups those
//! conversations by listing and picks deterministic defaults so a seller
//! view can open directly onto its first conversation.

use crate::conversation::normalize_email;
use crate::error::{Error, Result};
use crate::store::{InboxMap, MessageStore};

/// A seller's conversations, grouped by listing.
///
/// Built from the store's seller projection; listings and the buyers under
/// each listing are both alphabetically ordered, so the same data always
/// produces the same inbox layout and the same default selection.
#[derive(Debug, Clone)]
pub struct Inbox {
    seller_email: String,
    conversations: InboxMap,
}

impl Inbox {
    /// Aggregate all conversations in which `seller_email` is the seller.
    ///
    /// A seller with no messages gets an empty inbox, not an error.
    pub async fn build(store: &dyn MessageStore, seller_email: &str) -> Result<Inbox> {
        let seller = normalize_email(seller_email);
        if seller.is_empty() {
            return Err(Error::MissingIdentity("seller email".into()));
        }
        let conversations = store.conversations_for_seller(&seller).await?;
        Ok(Inbox {
            seller_email: seller,
            conversations,
        })
    }

    /// The seller this inbox belongs to, normalized.
    pub fn seller_email(&self) -> &str {
        &self.seller_email
    }

    /// Listings with at least one conversation, alphabetical.
    pub fn listings(&self) -> impl Iterator<Item = &str> {
        self.conversations.keys().map(String::as_str)
    }

    /// Buyers who have written about `listing_id`, alphabetical.
    pub fn counterparts(&self, listing_id: &str) -> impl Iterator<Item = &str> {
        self.conversations
            .get(listing_id)
            .into_iter()
            .flat_map(|buyers| buyers.iter().map(String::as_str))
    }

    /// The buyer a seller view opens onto for `listing_id`: the first
    /// counterpart, or None when nobody has written about it.
    pub fn default_counterpart(&self, listing_id: &str) -> Option<&str> {
        self.counterparts(listing_id).next()
    }

    /// The (listing, buyer) pair a fresh seller view opens onto.
    pub fn default_selection(&self) -> Option<(&str, &str)> {
        let (listing, buyers) = self.conversations.iter().next()?;
        let buyer = buyers.iter().next()?;
        Some((listing.as_str(), buyer.as_str()))
    }

    /// Total number of (listing, buyer) conversations.
    pub fn conversation_count(&self) -> usize {
        self.conversations.values().map(|buyers| buyers.len()).sum()
    }

    /// Whether nobody has written to this seller yet.
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
