//! # Error Handling
//!
//! One error type for the whole library, categorized by where in the chat
//! lifecycle the failure occurs.
//!
//! ```text
//! Error
//! │
//! ├── Session Start (fatal, never auto-retried)
//! │   ├── AmbiguousRole    - role hint unknown, refuse to guess
//! │   └── MissingIdentity  - a required identifier is blank
//! │
//! ├── Drafts (recoverable by user action)
//! │   └── Validation       - empty body, missing participant, bad sender
//! │
//! ├── Connection (recoverable, session retries in the background)
//! │   ├── NotConnected     - send attempted while offline
//! │   └── Transport        - handshake failure or unexpected disconnect
//! │
//! ├── Store (non-fatal warning, never tears down a live session)
//! │   └── StoreUnavailable - persistence layer unreachable or failing
//! │
//! └── Internal
//!     ├── Serialization    - malformed frame or body
//!     └── Internal         - invariant breach, should not happen
//! ```
//!
//! Propagation policy: session-start errors are surfaced immediately and the
//! session never opens; connection errors keep the session alive behind a
//! visible reconnecting state; store errors are reported as warnings and the
//! live subscription proceeds without history.

use thiserror::Error;

/// Result type alias for haggle-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for haggle-core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Session Start Errors
    // ========================================================================

    /// The buyer/seller role hint could not be resolved
    #[error("Ambiguous role: {0}. Each chat view must state whether it is the buyer or the seller.")]
    AmbiguousRole(String),

    /// A required identifier was blank at session start
    #[error("Missing identity: {0} is required to open a conversation.")]
    MissingIdentity(String),

    // ========================================================================
    // Draft Errors
    // ========================================================================

    /// A message draft failed validation before append
    #[error("Invalid message: {0}")]
    Validation(String),

    // ========================================================================
    // Connection Errors
    // ========================================================================

    /// A send was attempted while the session is not connected
    #[error("Not connected. Wait for the session to reconnect before sending.")]
    NotConnected,

    /// Transport handshake failed or the connection dropped unexpectedly
    #[error("Transport error: {0}")]
    Transport(String),

    // ========================================================================
    // Store Errors
    // ========================================================================

    /// The message store could not serve a read or write
    #[error("Message store unavailable: {0}")]
    StoreUnavailable(String),

    // ========================================================================
    // Internal Errors
    // ========================================================================

    /// Serialization or deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is recoverable
    ///
    /// Recoverable errors resolve themselves through the session's own
    /// reconnect loop or through user action (editing a draft, waiting for
    /// the connection indicator to clear).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::NotConnected
                | Error::Transport(_)
                | Error::StoreUnavailable(_)
        )
    }

    /// Check if this error prevents a session from starting at all
    ///
    /// These are reported once and never retried automatically; the caller
    /// must supply corrected identifiers.
    pub fn is_fatal_to_session_start(&self) -> bool {
        matches!(self, Error::AmbiguousRole(_) | Error::MissingIdentity(_))
    }

    /// Check if this error should be surfaced as a warning rather than a
    /// failure (store problems degrade a session, they never close it)
    pub fn is_store_warning(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
