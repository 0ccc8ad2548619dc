//! SQLite-backed message store.
//!
//! The broker's durable mode. One `messages` table, append-only; the
//! conversation index serves history reads and the seller index serves the
//! inbox projection. SQLite statements are atomic, which is all the
//! per-message atomicity the append contract asks for.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::conversation::{normalize_email, ChatMessage, ConversationKey, MessageDraft};
use crate::error::{Error, Result};
use crate::time;

use super::{InboxMap, MessageStore};

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Chat messages
-- One row per persisted message; append-only, never updated or deleted
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    -- The listing the conversation is about
    listing_id TEXT NOT NULL,
    -- Fixed participants, normalized before insert
    buyer_email TEXT NOT NULL,
    seller_email TEXT NOT NULL,
    -- Author email, always one of the two participants
    sender TEXT NOT NULL,
    -- Message text, non-empty
    body TEXT NOT NULL,
    -- Unix milliseconds, strictly increasing within a conversation
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(listing_id, buyer_email, seller_email, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_seller ON messages(seller_email);
"#;

/// Message store on a SQLite database, file-backed or in memory.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a store.
    ///
    /// If path is None, creates an in-memory database (useful for testing
    /// and for running the broker without durability).
    pub async fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::StoreUnavailable(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::StoreUnavailable(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                conn.execute_batch(CREATE_TABLES).map_err(|e| {
                    Error::StoreUnavailable(format!("Failed to create tables: {}", e))
                })?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![SCHEMA_VERSION],
                )
                .map_err(|e| {
                    Error::StoreUnavailable(format!("Failed to set schema version: {}", e))
                })?;
                tracing::info!("Message store schema created (version {})", SCHEMA_VERSION);
            }
            Some(v) => {
                tracing::debug!("Message store schema version: {}", v);
            }
        }

        Ok(())
    }

    /// Total number of persisted messages.
    pub fn message_count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .map_err(|e| Error::StoreUnavailable(format!("Failed to count messages: {}", e)))
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn fetch_history(&self, key: &ConversationKey) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(
                "SELECT id, listing_id, sender, buyer_email, seller_email, body, created_at
                 FROM messages
                 WHERE listing_id = ? AND buyer_email = ? AND seller_email = ?
                 ORDER BY created_at, sender, id",
            )
            .map_err(|e| Error::StoreUnavailable(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(
                params![key.listing_id, key.buyer_email, key.seller_email],
                |row| {
                    Ok(ChatMessage {
                        id: row.get(0)?,
                        listing_id: row.get(1)?,
                        sender: row.get(2)?,
                        buyer_email: row.get(3)?,
                        seller_email: row.get(4)?,
                        body: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .map_err(|e| Error::StoreUnavailable(format!("Failed to query history: {}", e)))?;

        let mut history = Vec::new();
        for row in rows {
            history.push(
                row.map_err(|e| Error::StoreUnavailable(format!("Failed to read message: {}", e)))?,
            );
        }
        Ok(history)
    }

    async fn append(&self, draft: MessageDraft) -> Result<ChatMessage> {
        let draft = draft.validated()?;
        let conn = self.conn.lock();

        // MAX over an empty set is one row holding NULL, hence the Option.
        let last: Option<i64> = conn
            .query_row(
                "SELECT MAX(created_at) FROM messages
                 WHERE listing_id = ? AND buyer_email = ? AND seller_email = ?",
                params![draft.listing_id, draft.buyer_email, draft.seller_email],
                |row| row.get(0),
            )
            .map_err(|e| {
                Error::StoreUnavailable(format!("Failed to read last timestamp: {}", e))
            })?;

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            listing_id: draft.listing_id,
            sender: draft.sender,
            buyer_email: draft.buyer_email,
            seller_email: draft.seller_email,
            body: draft.body,
            created_at: time::monotonic_millis(last),
        };

        conn.execute(
            "INSERT INTO messages (id, listing_id, sender, buyer_email, seller_email, body, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                message.id,
                message.listing_id,
                message.sender,
                message.buyer_email,
                message.seller_email,
                message.body,
                message.created_at,
            ],
        )
        .map_err(|e| Error::StoreUnavailable(format!("Failed to append message: {}", e)))?;

        Ok(message)
    }

    async fn conversations_for_seller(&self, seller_email: &str) -> Result<InboxMap> {
        let seller = normalize_email(seller_email);
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT listing_id, buyer_email FROM messages
                 WHERE seller_email = ?
                 ORDER BY listing_id, buyer_email",
            )
            .map_err(|e| Error::StoreUnavailable(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![seller], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| Error::StoreUnavailable(format!("Failed to query inbox: {}", e)))?;

        let mut inbox = InboxMap::new();
        for row in rows {
            let (listing_id, buyer_email) = row
                .map_err(|e| Error::StoreUnavailable(format!("Failed to read inbox row: {}", e)))?;
            inbox.entry(listing_id).or_default().insert(buyer_email);
        }
        Ok(inbox)
    }
}
