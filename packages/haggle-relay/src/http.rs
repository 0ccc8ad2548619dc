//! Chat REST API handlers.
//!
//! The read side of the broker: history and inbox queries against the
//! store, plus an append endpoint that runs the same persist-then-fan-out
//! pipeline as a WebSocket publish. Success responses carry the resource
//! directly; errors carry `{"error": ...}` with a status matching the
//! error class.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use haggle_core::conversation::{ConversationKey, MessageDraft};
use haggle_core::Error;

use crate::state::BrokerState;

// ── Request Types ────────────────────────────────────────────────────────────

/// GET /api/chat/history
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub listing_id: String,
    pub buyer_email: String,
    pub seller_email: String,
}

fn error_response(e: &Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        Error::Validation(_) | Error::MissingIdentity(_) | Error::AmbiguousRole(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /api/chat/history — One conversation's messages, oldest first.
///
/// All three identifiers are required; a conversation nobody has written
/// to yet is an empty list, not an error.
pub async fn history(
    State(state): State<BrokerState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let key = ConversationKey::new(&query.listing_id, &query.buyer_email, &query.seller_email);
    match state.store.fetch_history(&key).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// GET /api/chat/seller/:seller_email — A seller's conversations grouped
/// by listing.
pub async fn seller_inbox(
    State(state): State<BrokerState>,
    Path(seller_email): Path<String>,
) -> impl IntoResponse {
    match state.store.conversations_for_seller(&seller_email).await {
        Ok(inbox) => Json(inbox).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// POST /api/chat/messages — Persist one message and fan it out live.
///
/// Same pipeline as a WebSocket publish, so clients appending over REST
/// still reach subscribers in real time.
pub async fn append(
    State(state): State<BrokerState>,
    Json(draft): Json<MessageDraft>,
) -> impl IntoResponse {
    match state.publish_message(draft).await {
        Ok(message) => (StatusCode::CREATED, Json(message)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BrokerConfig;
    use haggle_core::conversation::subscribe_address;
    use haggle_core::protocol::ServerMessage;
    use haggle_core::store::MemoryStore;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn test_state() -> BrokerState {
        BrokerState::new(BrokerConfig::default(), Arc::new(MemoryStore::new()))
    }

    fn test_draft(body: &str) -> MessageDraft {
        MessageDraft::compose(
            &ConversationKey::new("L1", "buyer@cars.com", "seller@cars.com"),
            "buyer@cars.com",
            body,
        )
    }

    #[tokio::test]
    async fn test_history_empty_conversation_is_ok() {
        let state = test_state();
        let response = history(
            State(state),
            Query(HistoryQuery {
                listing_id: "L1".to_string(),
                buyer_email: "buyer@cars.com".to_string(),
                seller_email: "seller@cars.com".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_append_rejects_blank_body() {
        let state = test_state();
        let response = append(State(state), Json(test_draft("   ")))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_append_reaches_live_subscribers() {
        let state = test_state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.router.subscribe(
            Uuid::new_v4(),
            &subscribe_address("L1", "seller@cars.com"),
            tx,
        );

        let response = append(State(state), Json(test_draft("via rest")))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        match rx.try_recv().unwrap() {
            ServerMessage::Message { message } => assert_eq!(message.body, "via rest"),
            other => panic!("Expected delivery, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_seller_inbox_is_ok_when_empty() {
        let state = test_state();
        let response = seller_inbox(State(state), Path("seller@cars.com".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
