//! WebSocket transport for chat sessions.
//!
//! The session state machine is written against the [`Transport`] and
//! [`TransportLink`] traits so tests can drive it with channel-backed fakes.
//! [`WsTransport`] is the production implementation on tokio-tungstenite,
//! exchanging JSON text frames with the broker's `/ws` endpoint.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

use crate::error::Result;
use crate::protocol::{ClientMessage, ServerMessage};

/// Dials the broker and produces live links.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to the broker at `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn TransportLink>>;
}

/// One live connection to the broker.
#[async_trait]
pub trait TransportLink: Send {
    /// Send one client frame.
    async fn send(&mut self, message: ClientMessage) -> Result<()>;

    /// Receive the next broker frame.
    ///
    /// Returns `Ok(None)` when the broker closed the connection cleanly;
    /// transport failures surface as [`crate::Error::Transport`].
    async fn recv(&mut self) -> Result<Option<ServerMessage>>;

    /// Close the connection, sending a close frame when the protocol has one.
    async fn close(&mut self) -> Result<()>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport over tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Create the WebSocket transport.
    pub fn new() -> Self {
        WsTransport
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn TransportLink>> {
        let (ws_stream, _) = connect_async(url).await?;
        let (sender, receiver) = ws_stream.split();
        Ok(Box::new(WsLink { sender, receiver }))
    }
}

/// Live WebSocket link exchanging JSON text frames.
pub struct WsLink {
    sender: SplitSink<WsStream, WsMessage>,
    receiver: SplitStream<WsStream>,
}

#[async_trait]
impl TransportLink for WsLink {
    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&message)?;
        self.sender.send(WsMessage::Text(json.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        while let Some(frame) = self.receiver.next().await {
            match frame? {
                WsMessage::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to parse broker frame");
                    }
                },
                WsMessage::Ping(_) => {
                    // tungstenite auto-responds to pings
                }
                WsMessage::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        self.sender.send(WsMessage::Close(None)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    /// Minimal broker stub: accepts one connection and answers pings.
    async fn spawn_pong_server() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut tx, mut rx) = ws.split();
            while let Some(Ok(frame)) = rx.next().await {
                if let WsMessage::Text(text) = frame {
                    let parsed: ClientMessage = serde_json::from_str(&text).unwrap();
                    if matches!(parsed, ClientMessage::Ping) {
                        let reply = serde_json::to_string(&ServerMessage::Pong).unwrap();
                        tx.send(WsMessage::Text(reply.into())).await.unwrap();
                    }
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_ws_round_trip() {
        let addr = spawn_pong_server().await;
        let transport = WsTransport::new();
        let mut link = transport.connect(&format!("ws://{}", addr)).await.unwrap();

        link.send(ClientMessage::Ping).await.unwrap();
        let reply = link.recv().await.unwrap();
        assert!(matches!(reply, Some(ServerMessage::Pong)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let transport = WsTransport::new();
        let err = transport
            .connect("ws://127.0.0.1:1")
            .await
            .err()
            .expect("connect to a closed port succeeded");
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_server_close_yields_none() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let transport = WsTransport::new();
        let mut link = transport.connect(&format!("ws://{}", addr)).await.unwrap();
        assert!(link.recv().await.unwrap().is_none());
    }
}
