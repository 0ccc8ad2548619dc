//! # Conversation Identity
//!
//! A conversation is the triple (listing, buyer, seller). This module owns
//! everything derived from that triple:
//!
//! - [`normalize_email`] — the single email canonicalization boundary
//! - [`Role`] — which side of the conversation the local participant is on
//! - [`ConversationKey`] — the canonical lookup key, identical no matter
//!   which participant computes it
//! - [`subscribe_address`] — the per-recipient live-delivery channel name
//! - [`ChatMessage`] / [`MessageDraft`] — the persisted record and its
//!   transient client-side form
//!
//! Keys are computed, never stored as rows of their own. Roles are fixed at
//! first message and never renegotiated: the buyer stays the buyer for the
//! life of the conversation.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// NORMALIZATION BOUNDARY
// ============================================================================

/// Canonicalize an email address for comparison and derivation.
///
/// Every email entering the library passes through this one function before
/// it is compared, stored, or turned into an address. Comparing or deriving
/// from a raw email anywhere else silently splits a conversation in two:
/// `Alice@X.com` and `alice@x.com` would land on different addresses and the
/// participants would never see each other's live messages.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

// ============================================================================
// ROLE
// ============================================================================

/// The local participant's side of a listing conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The party inquiring about the listing
    Buyer,
    /// The party who owns the listing
    Seller,
}

impl Role {
    /// Parse a role hint from external input (route state, query string).
    ///
    /// Only an unambiguous buyer/seller spelling is accepted. Anything else
    /// fails with [`Error::AmbiguousRole`]; the resolver never guesses which
    /// side a view is on.
    pub fn parse(hint: &str) -> Result<Role> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "buyer" => Ok(Role::Buyer),
            "seller" => Ok(Role::Seller),
            other => Err(Error::AmbiguousRole(if other.is_empty() {
                "no role hint given".to_string()
            } else {
                format!("'{}' is not a conversation side", other)
            })),
        }
    }

    /// The other side of the conversation.
    pub fn counterpart(self) -> Role {
        match self {
            Role::Buyer => Role::Seller,
            Role::Seller => Role::Buyer,
        }
    }

    /// Stable lowercase name, matching the wire encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
        }
    }
}

// ============================================================================
// CONVERSATION KEY
// ============================================================================

/// Canonical identity of one buyer ↔ seller conversation about one listing.
///
/// Two keys are equal iff all three fields match after normalization. The
/// key is order-independent across viewpoints: the buyer resolving
/// `(listing, me, them, Buyer)` and the seller resolving
/// `(listing, me, them, Seller)` produce the identical value, which is what
/// makes history lookups meet in the middle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    /// The car listing being discussed
    pub listing_id: String,
    /// The inquiring party, normalized
    pub buyer_email: String,
    /// The listing owner, normalized
    pub seller_email: String,
}

impl ConversationKey {
    /// Build a key from already-assigned participant fields, normalizing
    /// every component. Used by the server and the store, where both roles
    /// are known from the record itself.
    pub fn new(listing_id: &str, buyer_email: &str, seller_email: &str) -> ConversationKey {
        ConversationKey {
            listing_id: listing_id.trim().to_string(),
            buyer_email: normalize_email(buyer_email),
            seller_email: normalize_email(seller_email),
        }
    }

    /// Resolve the canonical key from the local participant's viewpoint.
    ///
    /// Pure function: the caller states who it is, who the counterpart is,
    /// and which side it is on; the role assigns the (buyer, seller) slots.
    /// Fails with [`Error::MissingIdentity`] when any identifier is blank —
    /// a session must refuse to start rather than connect as nobody.
    pub fn resolve(
        listing_id: &str,
        own_email: &str,
        counterpart_email: &str,
        role: Role,
    ) -> Result<ConversationKey> {
        let listing_id = listing_id.trim();
        if listing_id.is_empty() {
            return Err(Error::MissingIdentity("listing id".into()));
        }
        let own = normalize_email(own_email);
        if own.is_empty() {
            return Err(Error::MissingIdentity("own email".into()));
        }
        let counterpart = normalize_email(counterpart_email);
        if counterpart.is_empty() {
            return Err(Error::MissingIdentity("counterpart email".into()));
        }

        let (buyer_email, seller_email) = match role {
            Role::Buyer => (own, counterpart),
            Role::Seller => (counterpart, own),
        };

        Ok(ConversationKey {
            listing_id: listing_id.to_string(),
            buyer_email,
            seller_email,
        })
    }

    /// Display-filter check: does this persisted message belong to this
    /// conversation? Exact three-field match after normalization.
    pub fn matches(&self, message: &ChatMessage) -> bool {
        *self == message.key()
    }

    /// The email of the participant holding `role` in this conversation.
    pub fn participant(&self, role: Role) -> &str {
        match role {
            Role::Buyer => &self.buyer_email,
            Role::Seller => &self.seller_email,
        }
    }

    /// The two live-delivery addresses for this conversation, buyer first.
    pub fn addresses(&self) -> (String, String) {
        (
            subscribe_address(&self.listing_id, &self.buyer_email),
            subscribe_address(&self.listing_id, &self.seller_email),
        )
    }
}

// ============================================================================
// SUBSCRIPTION ADDRESS
// ============================================================================

/// Derive the live-delivery channel name for one recipient of one listing.
///
/// Format: `chat/{listing}/{email}` with both segments percent-encoded
/// after normalization. Percent-encoding is injective, so two distinct
/// emails can never collide on one address, and no input can forge the `/`
/// separator to escape its segment. Client and server both derive addresses
/// through this function; there is no second copy of the rule to drift.
pub fn subscribe_address(listing_id: &str, email: &str) -> String {
    format!(
        "chat/{}/{}",
        urlencoding::encode(listing_id.trim()),
        urlencoding::encode(&normalize_email(email)),
    )
}

// ============================================================================
// MESSAGES
// ============================================================================

/// A persisted chat message.
///
/// Append-only: once the store has assigned `id` and `created_at`, the
/// record is never mutated or deleted by this subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Store-assigned id (uuid); only persisted messages carry one
    pub id: String,
    /// The car listing being discussed
    pub listing_id: String,
    /// Author email, normalized
    pub sender: String,
    /// The fixed buyer participant, normalized
    pub buyer_email: String,
    /// The fixed seller participant, normalized
    pub seller_email: String,
    /// Free text, non-empty
    pub body: String,
    /// Server-assigned Unix-millisecond timestamp, strictly increasing
    /// within the conversation
    pub created_at: i64,
}

impl ChatMessage {
    /// The conversation this message belongs to.
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(&self.listing_id, &self.buyer_email, &self.seller_email)
    }

    /// Display ordering: `created_at` ascending with (sender, id) breaking
    /// timestamp ties, so equal-millisecond messages still render in one
    /// deterministic order on every client.
    pub fn sort_key(&self) -> (i64, &str, &str) {
        (self.created_at, self.sender.as_str(), self.id.as_str())
    }
}

/// A client-composed message not yet acknowledged as persisted.
///
/// Drafts have no id and no timestamp; both are assigned by the store on
/// append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    /// The car listing being discussed
    pub listing_id: String,
    /// Author email
    pub sender: String,
    /// The fixed buyer participant
    pub buyer_email: String,
    /// The fixed seller participant
    pub seller_email: String,
    /// Free text
    pub body: String,
}

impl MessageDraft {
    /// Compose a draft for a resolved conversation.
    pub fn compose(key: &ConversationKey, sender: &str, body: &str) -> MessageDraft {
        MessageDraft {
            listing_id: key.listing_id.clone(),
            sender: normalize_email(sender),
            buyer_email: key.buyer_email.clone(),
            seller_email: key.seller_email.clone(),
            body: body.to_string(),
        }
    }

    /// Validate and normalize, returning the draft ready for append.
    ///
    /// Fails with [`Error::Validation`] when the body is blank, any
    /// participant field is missing, or the sender is neither the buyer nor
    /// the seller of the conversation it claims to belong to.
    pub fn validated(self) -> Result<MessageDraft> {
        let listing_id = self.listing_id.trim().to_string();
        if listing_id.is_empty() {
            return Err(Error::Validation("listing id is required".into()));
        }
        let sender = normalize_email(&self.sender);
        if sender.is_empty() {
            return Err(Error::Validation("sender is required".into()));
        }
        let buyer_email = normalize_email(&self.buyer_email);
        if buyer_email.is_empty() {
            return Err(Error::Validation("buyer email is required".into()));
        }
        let seller_email = normalize_email(&self.seller_email);
        if seller_email.is_empty() {
            return Err(Error::Validation("seller email is required".into()));
        }
        if sender != buyer_email && sender != seller_email {
            return Err(Error::Validation(format!(
                "sender {} is not a participant of this conversation",
                sender
            )));
        }
        if self.body.trim().is_empty() {
            return Err(Error::Validation("message body is empty".into()));
        }

        Ok(MessageDraft {
            listing_id,
            sender,
            buyer_email,
            seller_email,
            body: self.body,
        })
    }

    /// The conversation this draft belongs to.
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(&self.listing_id, &self.buyer_email, &self.seller_email)
    }
}

// ============================================================================
// TESTS
// ============================================================================
