//! Haggle Chat Broker
//!
//! A lightweight WebSocket + REST broker for per-listing buyer ↔ seller
//! conversations:
//!
//! 1. **Live chat relay**: Connections register their email, subscribe to
//!    their own per-listing address, and publish messages that are fanned
//!    out to both participants of the conversation.
//!
//! 2. **Durable history**: Every message is persisted (SQLite) before it is
//!    delivered, so a reconnecting client can always backfill what it
//!    missed over REST.
//!
//! 3. **Seller inbox**: A grouped view of who has written about which
//!    listing, serving the seller's conversation picker.
//!
//! The conversation model and wire protocol live in `haggle-core`; this
//! binary wires them to axum.

mod http;
mod state;
mod ws;

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::Method,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use haggle_core::store::SqliteStore;
use state::{BrokerConfig, BrokerState, DEFAULT_PORT};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "haggle-relay", version, about = "Haggle listing chat broker")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "HAGGLE_PORT")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "HAGGLE_BIND")]
    bind: String,

    /// SQLite database path for message history (in-memory when not set)
    #[arg(long, env = "HAGGLE_DB")]
    db: Option<String>,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "haggle_relay=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let store = SqliteStore::open(args.db.as_deref())
        .await
        .expect("Failed to open message store");
    match &args.db {
        Some(path) => tracing::info!(path = path.as_str(), "Message store opened"),
        None => tracing::info!("Message store running in memory (no --db path)"),
    }

    let config = BrokerConfig {
        port: args.port,
        bind: args.bind,
        db_path: args.db,
    };
    let state = BrokerState::new(config, Arc::new(store));
    let app = build_router(state.clone());

    let addr = format!("{}:{}", state.config.bind, state.config.port);
    tracing::info!("Haggle chat broker starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server error");
}

/// Build the full route table over the given state.
fn build_router(state: BrokerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/chat/history", get(http::history))
        .route("/api/chat/seller/:seller_email", get(http::seller_inbox))
        .route("/api/chat/messages", post(http::append))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for chat connections.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<BrokerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_websocket(socket, state))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "haggle-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<BrokerState>) -> impl IntoResponse {
    Json(json!({
        "online_connections": state.connection_count(),
        "subscribed_addresses": state.router.address_count(),
        "active_subscriptions": state.router.subscription_count(),
        "uptime_secs": (chrono::Utc::now() - state.started_at).num_seconds(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use haggle_core::conversation::ChatMessage;
    use haggle_core::protocol::{ClientMessage, ServerMessage};
    use haggle_core::Role;
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    type WsStream = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn spawn_broker() -> String {
        let store = SqliteStore::open(None).await.unwrap();
        let state = BrokerState::new(BrokerConfig::default(), Arc::new(store));
        let app = build_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("127.0.0.1:{}", addr.port())
    }

    async fn connect_ws(base: &str) -> WsStream {
        let (ws, _) = connect_async(format!("ws://{}/ws", base)).await.unwrap();
        ws
    }

    async fn send(ws: &mut WsStream, msg: &ClientMessage) {
        ws.send(WsMessage::Text(serde_json::to_string(msg).unwrap().into()))
            .await
            .unwrap();
    }

    async fn recv(ws: &mut WsStream) -> ServerMessage {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for server frame")
                .expect("socket closed")
                .unwrap();
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Register and subscribe one participant for a listing.
    async fn join(base: &str, email: &str, listing: &str) -> WsStream {
        let mut ws = connect_ws(base).await;
        send(
            &mut ws,
            &ClientMessage::Register {
                email: email.to_string(),
            },
        )
        .await;
        match recv(&mut ws).await {
            ServerMessage::Registered { .. } => {}
            other => panic!("Expected registered, got {:?}", other),
        }
        send(
            &mut ws,
            &ClientMessage::Subscribe {
                listing_id: listing.to_string(),
            },
        )
        .await;
        match recv(&mut ws).await {
            ServerMessage::Subscribed { .. } => {}
            other => panic!("Expected subscribed, got {:?}", other),
        }
        ws
    }

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.port, 4870);
        assert_eq!(config.bind, "0.0.0.0");
        assert!(config.db_path.is_none());
    }

    #[tokio::test]
    async fn test_registration_required_first() {
        let base = spawn_broker().await;
        let mut ws = connect_ws(&base).await;

        send(
            &mut ws,
            &ClientMessage::Subscribe {
                listing_id: "L1".to_string(),
            },
        )
        .await;
        match recv(&mut ws).await {
            ServerMessage::Error { message } => {
                assert!(message.contains("register"), "unexpected error: {}", message)
            }
            other => panic!("Expected error, got {:?}", other),
        }

        // A bogus email is refused, a real one accepted.
        send(
            &mut ws,
            &ClientMessage::Register {
                email: "not-an-email".to_string(),
            },
        )
        .await;
        assert!(matches!(recv(&mut ws).await, ServerMessage::Error { .. }));
        send(
            &mut ws,
            &ClientMessage::Register {
                email: "  Buyer@Cars.com ".to_string(),
            },
        )
        .await;
        match recv(&mut ws).await {
            ServerMessage::Registered { email } => assert_eq!(email, "buyer@cars.com"),
            other => panic!("Expected registered, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_conversation_round_trip() {
        let base = spawn_broker().await;
        let mut buyer = join(&base, "buyer@cars.com", "L1").await;
        let mut seller = join(&base, "seller@cars.com", "L1").await;

        // Buyer publishes; the fan-out echo precedes the ack on the
        // buyer's own connection.
        send(
            &mut buyer,
            &ClientMessage::Publish {
                listing_id: "L1".to_string(),
                counterpart_email: "seller@cars.com".to_string(),
                role: Role::Buyer,
                body: "still available?".to_string(),
            },
        )
        .await;

        let echoed = match recv(&mut buyer).await {
            ServerMessage::Message { message } => message,
            other => panic!("Expected echo, got {:?}", other),
        };
        assert_eq!(echoed.sender, "buyer@cars.com");
        assert_eq!(echoed.buyer_email, "buyer@cars.com");
        assert_eq!(echoed.seller_email, "seller@cars.com");
        assert!(!echoed.id.is_empty());
        match recv(&mut buyer).await {
            ServerMessage::Ack { id } => assert_eq!(id, echoed.id),
            other => panic!("Expected ack, got {:?}", other),
        }

        // Seller receives the same persisted record live.
        match recv(&mut seller).await {
            ServerMessage::Message { message } => assert_eq!(message.id, echoed.id),
            other => panic!("Expected delivery, got {:?}", other),
        }

        // Seller replies; buyer sees it live.
        send(
            &mut seller,
            &ClientMessage::Publish {
                listing_id: "L1".to_string(),
                counterpart_email: "buyer@cars.com".to_string(),
                role: Role::Seller,
                body: "yes, come by tomorrow".to_string(),
            },
        )
        .await;
        match recv(&mut buyer).await {
            ServerMessage::Message { message } => {
                assert_eq!(message.sender, "seller@cars.com");
                assert!(message.created_at >= echoed.created_at);
            }
            other => panic!("Expected delivery, got {:?}", other),
        }

        // REST history sees both messages in order.
        let history: Vec<ChatMessage> = reqwest::get(format!(
            "http://{}/api/chat/history?listing_id=L1&buyer_email=buyer@cars.com&seller_email=seller@cars.com",
            base
        ))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].body, "still available?");
        assert_eq!(history[1].body, "yes, come by tomorrow");

        // And the seller's inbox lists the buyer under the listing.
        let inbox: BTreeMap<String, BTreeSet<String>> = reqwest::get(format!(
            "http://{}/api/chat/seller/seller@cars.com",
            base
        ))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(inbox["L1"].contains("buyer@cars.com"));
    }

    #[tokio::test]
    async fn test_two_buyers_are_isolated() {
        let base = spawn_broker().await;
        let mut amy = join(&base, "amy@cars.com", "L1").await;
        let mut zoe = join(&base, "zoe@cars.com", "L1").await;

        send(
            &mut amy,
            &ClientMessage::Publish {
                listing_id: "L1".to_string(),
                counterpart_email: "seller@cars.com".to_string(),
                role: Role::Buyer,
                body: "amy's private offer".to_string(),
            },
        )
        .await;
        match recv(&mut amy).await {
            ServerMessage::Message { message } => assert_eq!(message.body, "amy's private offer"),
            other => panic!("Expected echo, got {:?}", other),
        }

        // Zoe's connection sees nothing of it: her next frame after a ping
        // is the pong, with no delivery queued ahead of it.
        send(&mut zoe, &ClientMessage::Ping).await;
        assert!(matches!(recv(&mut zoe).await, ServerMessage::Pong));

        // Zoe's history with the seller is still empty.
        let history: Vec<ChatMessage> = reqwest::get(format!(
            "http://{}/api/chat/history?listing_id=L1&buyer_email=zoe@cars.com&seller_email=seller@cars.com",
            base
        ))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_health_and_stats() {
        let base = spawn_broker().await;
        let _ws = join(&base, "buyer@cars.com", "L1").await;

        let health: serde_json::Value = reqwest::get(format!("http://{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["service"], "haggle-relay");

        let stats: serde_json::Value = reqwest::get(format!("http://{}/stats", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["online_connections"], 1);
        assert_eq!(stats["subscribed_addresses"], 1);
    }
}
