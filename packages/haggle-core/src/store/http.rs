//! Broker-backed message store.
//!
//! Client-side store that talks to the broker's REST endpoints instead of a
//! local database. The broker runs the same validation and timestamping as
//! its own store, so drafts round-trip through one pipeline no matter which
//! side appends them.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::conversation::{ChatMessage, ConversationKey, MessageDraft};
use crate::error::{Error, Result};

use super::{InboxMap, MessageStore};

/// Error body returned by the broker's REST endpoints.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Message store backed by a broker's REST API.
pub struct HttpStore {
    base_url: String,
    client: Client,
}

impl HttpStore {
    /// Create a store against a broker base URL, e.g. `http://localhost:4870`.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Base URL this store talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Map a non-success response to an error, recovering the broker's
    /// message when the body carries one.
    async fn response_error(response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::BAD_REQUEST {
            if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body) {
                return Error::Validation(parsed.error);
            }
        }
        Error::StoreUnavailable(format!("Broker returned {}: {}", status, body))
    }
}

#[async_trait]
impl MessageStore for HttpStore {
    async fn fetch_history(&self, key: &ConversationKey) -> Result<Vec<ChatMessage>> {
        let response = self
            .client
            .get(format!("{}/api/chat/history", self.base_url))
            .query(&[
                ("listing_id", key.listing_id.as_str()),
                ("buyer_email", key.buyer_email.as_str()),
                ("seller_email", key.seller_email.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::response_error(response).await);
        }
        Ok(response.json().await?)
    }

    async fn append(&self, draft: MessageDraft) -> Result<ChatMessage> {
        // Validate locally first so malformed drafts fail without a round trip.
        let draft = draft.validated()?;

        let response = self
            .client
            .post(format!("{}/api/chat/messages", self.base_url))
            .json(&draft)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::response_error(response).await);
        }
        Ok(response.json().await?)
    }

    async fn conversations_for_seller(&self, seller_email: &str) -> Result<InboxMap> {
        let response = self
            .client
            .get(format!(
                "{}/api/chat/seller/{}",
                self.base_url,
                urlencoding::encode(seller_email)
            ))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::response_error(response).await);
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let store = HttpStore::new("http://localhost:4870/");
        assert_eq!(store.base_url(), "http://localhost:4870");
        let store = HttpStore::new("http://localhost:4870");
        assert_eq!(store.base_url(), "http://localhost:4870");
    }

    #[tokio::test]
    async fn test_invalid_draft_rejected_before_sending() {
        // Points at nothing; local validation must fail first.
        let store = HttpStore::new("http://127.0.0.1:1");
        let key = ConversationKey::new("L1", "a@x.com", "b@x.com");
        let err = store
            .append(MessageDraft::compose(&key, "a@x.com", "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_store_unavailable() {
        let store = HttpStore::new("http://127.0.0.1:1");
        let key = ConversationKey::new("L1", "a@x.com", "b@x.com");
        let err = store.fetch_history(&key).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }
}
