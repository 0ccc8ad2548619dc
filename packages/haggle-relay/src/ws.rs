//! WebSocket connection handler.
//!
//! Manages individual chat connections: the registration handshake, the
//! subscribe/publish dispatch, and cleanup when the socket closes.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use haggle_core::conversation::{
    normalize_email, subscribe_address, ConversationKey, MessageDraft, Role,
};
use haggle_core::protocol::{ClientMessage, ServerMessage};
use haggle_core::router::Subscriber;

use crate::state::BrokerState;

/// Handle a single WebSocket connection.
///
/// This function runs for the lifetime of the connection:
/// 1. Waits for a `Register` message carrying the connection's email
/// 2. Spawns a sender task to forward outbound messages
/// 3. Processes subscribe/publish messages until the connection closes
pub async fn handle_websocket(socket: WebSocket, state: BrokerState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create the outbound channel for this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = Uuid::new_v4();

    // ── Step 1: Wait for Registration ─────────────────────────────────────

    let email = loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Register { email }) => {
                        let email = normalize_email(&email);
                        if email.is_empty() || !email.contains('@') {
                            let err = ServerMessage::Error {
                                message: "A valid email is required to register".to_string(),
                            };
                            let _ = ws_sender
                                .send(Message::Text(serde_json::to_string(&err).unwrap()))
                                .await;
                            continue;
                        }

                        // Send registration confirmation
                        let ack = ServerMessage::Registered {
                            email: email.clone(),
                        };
                        if ws_sender
                            .send(Message::Text(serde_json::to_string(&ack).unwrap()))
                            .await
                            .is_err()
                        {
                            return; // Connection closed
                        }

                        break email;
                    }
                    Ok(ClientMessage::Ping) => {
                        let pong = ServerMessage::Pong;
                        let _ = ws_sender
                            .send(Message::Text(serde_json::to_string(&pong).unwrap()))
                            .await;
                    }
                    Ok(_) => {
                        let err = ServerMessage::Error {
                            message: "Must register before sending other messages".to_string(),
                        };
                        let _ = ws_sender
                            .send(Message::Text(serde_json::to_string(&err).unwrap()))
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse client message: {}", e);
                        let err = ServerMessage::Error {
                            message: format!("Invalid message format: {}", e),
                        };
                        let _ = ws_sender
                            .send(Message::Text(serde_json::to_string(&err).unwrap()))
                            .await;
                    }
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = ws_sender.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                return; // Connection closed before registration
            }
            _ => continue,
        }
    };

    // ── Step 2: Register Connection ───────────────────────────────────────

    state.register_connection(conn_id, &email);

    // ── Step 3: Spawn Sender Task ─────────────────────────────────────────

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize server message: {}", e);
                }
            }
        }
    });

    // ── Step 4: Process Messages ──────────────────────────────────────────

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    handle_client_message(&state, conn_id, &email, &tx, client_msg).await;
                }
                Err(e) => {
                    tracing::warn!(
                        email = email.as_str(),
                        error = %e,
                        "Failed to parse client message"
                    );
                    let _ = tx.send(ServerMessage::Error {
                        message: format!("Invalid message format: {}", e),
                    });
                }
            },
            Ok(Message::Ping(_data)) => {
                // Axum answers pings at the protocol level; keep the
                // application-level reply for clients that want it.
                let _ = tx.send(ServerMessage::Pong);
            }
            Ok(Message::Close(_)) => {
                tracing::info!(email = email.as_str(), "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::warn!(
                    email = email.as_str(),
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
            _ => {} // Binary, Pong — ignore
        }
    }

    // ── Step 5: Cleanup ───────────────────────────────────────────────────

    state.unregister_connection(conn_id);
    sender_task.abort();
    tracing::info!(email = email.as_str(), "WebSocket disconnected");
}

/// Handle a parsed client message from a registered connection.
async fn handle_client_message(
    state: &BrokerState,
    conn_id: Uuid,
    email: &str,
    tx: &Subscriber,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::Register { .. } => {
            // Already registered — a connection's identity never changes
            let _ = tx.send(ServerMessage::Error {
                message: "Already registered".to_string(),
            });
        }

        ClientMessage::Subscribe { listing_id } => {
            handle_subscribe(state, conn_id, email, tx, &listing_id);
        }

        ClientMessage::Publish {
            listing_id,
            counterpart_email,
            role,
            body,
        } => {
            handle_publish(state, email, tx, &listing_id, &counterpart_email, role, &body).await;
        }

        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
    }
}

// ── Message Handlers ──────────────────────────────────────────────────────────

/// Subscribe the connection to its own address for one listing.
///
/// The address is derived from the registered email, never from the
/// message, so a connection cannot listen on somebody else's channel.
fn handle_subscribe(
    state: &BrokerState,
    conn_id: Uuid,
    email: &str,
    tx: &Subscriber,
    listing_id: &str,
) {
    let listing_id = listing_id.trim();
    if listing_id.is_empty() {
        let _ = tx.send(ServerMessage::Error {
            message: "A listing id is required to subscribe".to_string(),
        });
        return;
    }

    let address = subscribe_address(listing_id, email);
    state.router.subscribe(conn_id, &address, tx.clone());
    tracing::debug!(
        email = email,
        listing_id = listing_id,
        address = address.as_str(),
        "Subscribed"
    );
    let _ = tx.send(ServerMessage::Subscribed { address });
}

/// Resolve, persist, and fan out one published message.
///
/// The sender is always the registered email; the client only names the
/// counterpart and its own side of the conversation.
async fn handle_publish(
    state: &BrokerState,
    email: &str,
    tx: &Subscriber,
    listing_id: &str,
    counterpart_email: &str,
    role: Role,
    body: &str,
) {
    let key = match ConversationKey::resolve(listing_id, email, counterpart_email, role) {
        Ok(key) => key,
        Err(e) => {
            let _ = tx.send(ServerMessage::Error {
                message: e.to_string(),
            });
            return;
        }
    };

    let draft = MessageDraft::compose(&key, email, body);
    match state.publish_message(draft).await {
        Ok(message) => {
            let _ = tx.send(ServerMessage::Ack { id: message.id });
        }
        Err(e) => {
            tracing::warn!(email = email, error = %e, "Publish failed");
            let _ = tx.send(ServerMessage::Error {
                message: e.to_string(),
            });
        }
    }
}
