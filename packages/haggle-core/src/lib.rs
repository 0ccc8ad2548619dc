//! # Haggle Core
//!
//! Real-time buyer ↔ seller chat for car listings: conversation identity,
//! durable history, live delivery, and the session state machine that ties
//! them together.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       LISTING CHAT DATA FLOW                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   Buyer side                     Broker                    Seller side  │
//! │  ┌────────────┐    WebSocket  ┌──────────┐   WebSocket   ┌────────────┐ │
//! │  │ChatSession │◄─────────────►│  Topic   │◄─────────────►│ChatSession │ │
//! │  └─────┬──────┘   register    │  Router  │               └─────┬──────┘ │
//! │        │         subscribe    └────┬─────┘                     │        │
//! │        │          publish          │ persist                   │        │
//! │        │                      ┌────▼─────┐                     │        │
//! │        │       REST history   │ Message  │   REST history      │        │
//! │        └─────────────────────►│  Store   │◄────────────────────┘        │
//! │                               └──────────┘                              │
//! │                                                                         │
//! │  One conversation = one (listing, buyer, seller) triple. Both sides     │
//! │  derive the identical ConversationKey and the identical subscription    │
//! │  addresses; the broker persists every message before fanning it out     │
//! │  to both participants.                                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`conversation`] - Conversation identity (keys, roles, addresses, messages)
//! - [`protocol`] - JSON wire protocol shared by client and broker
//! - [`router`] - Address-based fan-out registry used by the broker
//! - [`store`] - Message persistence (memory, SQLite, broker-backed HTTP)
//! - [`transport`] - WebSocket transport behind a testable trait
//! - [`session`] - Per-conversation client state machine
//! - [`inbox`] - Seller-side conversation aggregation
//!
//! ## Conversation Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CONVERSATION LIFECYCLE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. Resolve                                                             │
//! │     (listing, own email, counterpart email, role)                       │
//! │        ──► ConversationKey { listing, buyer, seller }                   │
//! │     The same key no matter which side computes it.                      │
//! │                                                                         │
//! │  2. Connect                                                             │
//! │     register identity ──► fetch history once ──► subscribe once         │
//! │     History is merged with live deliveries by message id.              │
//! │                                                                         │
//! │  3. Chat                                                                │
//! │     publish ──► broker persists ──► fan-out to both participants        │
//! │     The sender's own copy comes back with id and timestamp.            │
//! │                                                                         │
//! │  4. Close (terminal) or drop ──► retry loop with fixed delay            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod conversation;
pub mod error;
pub mod inbox;
pub mod protocol;
pub mod router;
pub mod session;
pub mod store;
pub mod time;
pub mod transport;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use conversation::{subscribe_address, ChatMessage, ConversationKey, MessageDraft, Role};
pub use error::{Error, Result};
pub use inbox::Inbox;
pub use session::{ChatSession, SessionConfig, SessionEvent, SessionState};
pub use store::{HttpStore, MemoryStore, MessageStore, SqliteStore};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Haggle Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
