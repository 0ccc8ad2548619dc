//! Chat session lifecycle.
//!
//! A [`ChatSession`] owns one live conversation from one participant's
//! viewpoint. Starting a session spawns a worker task that drives the
//! connection through its lifecycle:
//!
//! ```text
//!   idle ──► connecting ──► connected
//!               ▲  │            │ drop
//!         retry │  ▼            ▼
//!               disconnected ◄──┘
//!                    │
//!                  closed (terminal, via close())
//! ```
//!
//! Each time a connection is established the worker registers its identity,
//! fetches history exactly once, then subscribes exactly once, in that
//! order. History and live deliveries are merged by message id, so a
//! message seen live and again in a later history fetch surfaces only once.
//! Messages that belong to a different conversation on the same listing are
//! discarded before they are surfaced.
//!
//! The worker answers the handle at every phase: a `send` while anything
//! but connected fails with [`Error::NotConnected`] instead of queueing,
//! and a `close` works everywhere — including mid-handshake, where an
//! in-flight history fetch is abandoned and its result discarded.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::conversation::{ChatMessage, ConversationKey, MessageDraft, Role};
use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::store::MessageStore;
use crate::transport::{Transport, TransportLink};

/// Delay between reconnection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Everything a session needs to resolve its conversation and dial in.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Broker WebSocket URL, e.g. `ws://localhost:4870/ws`
    pub broker_url: String,
    /// The listing this conversation is about
    pub listing_id: String,
    /// The local participant's email (already authenticated upstream)
    pub own_email: String,
    /// The other participant's email
    pub counterpart_email: String,
    /// Which side of the conversation the local participant is on
    pub role: Role,
    /// Delay between reconnection attempts
    pub retry_delay: Duration,
}

impl SessionConfig {
    /// Build a config with the default retry delay.
    pub fn new(
        broker_url: &str,
        listing_id: &str,
        own_email: &str,
        counterpart_email: &str,
        role: Role,
    ) -> Self {
        Self {
            broker_url: broker_url.to_string(),
            listing_id: listing_id.to_string(),
            own_email: own_email.to_string(),
            counterpart_email: counterpart_email.to_string(),
            role,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

// ============================================================================
// STATES AND EVENTS
// ============================================================================

/// Lifecycle state of a chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but the worker has not started dialing yet
    Idle,
    /// Dialing the broker or mid-handshake
    Connecting,
    /// Registered, history loaded, subscribed; sends are accepted
    Connected,
    /// Connection lost; waiting out the retry delay
    Disconnected,
    /// Terminal; no further events will be emitted
    Closed,
}

/// Events a session surfaces to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The lifecycle state changed
    StateChanged(SessionState),
    /// A history fetch completed; carries the messages not yet surfaced
    /// on this session, oldest first
    HistoryLoaded(Vec<ChatMessage>),
    /// One live message for this conversation, history-deduplicated
    MessageReceived(ChatMessage),
    /// History could not be fetched; live chat continues without it
    StoreWarning(String),
}

enum SessionCommand {
    Send {
        body: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Close,
}

// ============================================================================
// SESSION HANDLE
// ============================================================================

/// Handle to a running chat session.
///
/// Cheap operations (`state`, `key`) read shared state directly; `send` and
/// `close` go through the worker's command channel.
pub struct ChatSession {
    key: ConversationKey,
    state: Arc<RwLock<SessionState>>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    task: JoinHandle<()>,
}

impl ChatSession {
    /// Resolve the conversation and spawn the session worker.
    ///
    /// Fails without spawning anything when the conversation cannot be
    /// resolved: a blank listing id or either email is
    /// [`Error::MissingIdentity`]. Connection failures are not start
    /// failures — the worker retries those forever until closed.
    pub fn start(
        config: SessionConfig,
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<(ChatSession, mpsc::UnboundedReceiver<SessionEvent>)> {
        let key = ConversationKey::resolve(
            &config.listing_id,
            &config.own_email,
            &config.counterpart_email,
            config.role,
        )?;

        let state = Arc::new(RwLock::new(SessionState::Idle));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = SessionWorker {
            config,
            key: key.clone(),
            store,
            transport,
            state: Arc::clone(&state),
            commands: command_rx,
            events: event_tx,
            seen: HashSet::new(),
        };
        let task = tokio::spawn(worker.run());

        Ok((
            ChatSession {
                key,
                state,
                commands: command_tx,
                task,
            },
            event_rx,
        ))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// The resolved conversation this session is bound to.
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// Send one message into the conversation.
    ///
    /// Accepted only while connected; there is no offline queue. A blank
    /// body fails with [`Error::Validation`] without touching the wire.
    /// Success means the publish was handed to the broker — the persisted
    /// copy comes back as a [`SessionEvent::MessageReceived`] echo carrying
    /// the store-assigned id and timestamp.
    pub async fn send(&self, body: &str) -> Result<()> {
        if self.state() != SessionState::Connected {
            return Err(Error::NotConnected);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Send {
                body: body.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Close the session and wait for the worker to finish.
    ///
    /// Terminal: the event channel ends after the final
    /// [`SessionState::Closed`] transition, and anything in flight — a
    /// connect attempt, a history fetch — is abandoned rather than applied.
    pub async fn close(self) {
        let _ = self.commands.send(SessionCommand::Close);
        let _ = self.task.await;
    }
}

// ============================================================================
// WORKER
// ============================================================================

/// What the worker does after a connection phase ends.
enum NextStep {
    Retry,
    Shutdown,
}

enum HandshakeAck {
    Registered,
    Subscribed,
}

struct SessionWorker {
    config: SessionConfig,
    key: ConversationKey,
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn Transport>,
    state: Arc<RwLock<SessionState>>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Ids already surfaced, across history fetches and live deliveries
    seen: HashSet<String>,
}

impl SessionWorker {
    async fn run(mut self) {
        loop {
            self.set_state(SessionState::Connecting);
            let step = match self.connect().await {
                Ok(link) => self.run_connection(link).await,
                Err(step) => step,
            };
            if let NextStep::Shutdown = step {
                break;
            }
            self.set_state(SessionState::Disconnected);
            if let NextStep::Shutdown = self.idle_until_retry().await {
                break;
            }
        }
        self.set_state(SessionState::Closed);
        tracing::info!(
            listing_id = self.key.listing_id.as_str(),
            "Chat session closed"
        );
    }

    /// Dial the broker, answering commands while the dial is in flight.
    async fn connect(&mut self) -> std::result::Result<Box<dyn TransportLink>, NextStep> {
        let transport = Arc::clone(&self.transport);
        let url = self.config.broker_url.clone();
        let dial = async move { transport.connect(&url).await };
        tokio::pin!(dial);

        loop {
            tokio::select! {
                result = &mut dial => {
                    return match result {
                        Ok(link) => Ok(link),
                        Err(e) => {
                            tracing::warn!(error = %e, "Broker connection failed");
                            Err(NextStep::Retry)
                        }
                    };
                }
                command = self.commands.recv() => {
                    if Self::close_requested(command) {
                        return Err(NextStep::Shutdown);
                    }
                }
            }
        }
    }

    /// One established connection: register, load history, subscribe, then
    /// relay live traffic until the link drops or the session closes.
    async fn run_connection(&mut self, mut link: Box<dyn TransportLink>) -> NextStep {
        let own_email = self.key.participant(self.config.role).to_string();
        if let Err(e) = link.send(ClientMessage::Register { email: own_email }).await {
            tracing::warn!(error = %e, "Failed to register with broker");
            return NextStep::Retry;
        }
        if let Err(step) = self.await_handshake(&mut link, HandshakeAck::Registered).await {
            return step;
        }

        // History strictly before subscribe, once per connection.
        if let Err(step) = self.load_history().await {
            return step;
        }

        let subscribe = ClientMessage::Subscribe {
            listing_id: self.key.listing_id.clone(),
        };
        if let Err(e) = link.send(subscribe).await {
            tracing::warn!(error = %e, "Failed to subscribe");
            return NextStep::Retry;
        }
        if let Err(step) = self.await_handshake(&mut link, HandshakeAck::Subscribed).await {
            return step;
        }

        self.set_state(SessionState::Connected);
        tracing::info!(
            listing_id = self.key.listing_id.as_str(),
            "Chat session connected"
        );
        self.live_loop(&mut link).await
    }

    /// Wait for one handshake acknowledgement, still answering commands.
    ///
    /// The broker activates a subscription before queueing its ack, so a
    /// counterpart publish can land ahead of `Subscribed` on the same
    /// connection. Such deliveries are surfaced here, not dropped.
    async fn await_handshake(
        &mut self,
        link: &mut Box<dyn TransportLink>,
        expect: HandshakeAck,
    ) -> std::result::Result<(), NextStep> {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    if Self::close_requested(command) {
                        return Err(NextStep::Shutdown);
                    }
                }
                frame = link.recv() => match frame {
                    Ok(Some(ServerMessage::Registered { .. }))
                        if matches!(expect, HandshakeAck::Registered) =>
                    {
                        return Ok(());
                    }
                    Ok(Some(ServerMessage::Subscribed { address }))
                        if matches!(expect, HandshakeAck::Subscribed) =>
                    {
                        tracing::debug!(address = address.as_str(), "Subscribed");
                        return Ok(());
                    }
                    Ok(Some(ServerMessage::Error { message })) => {
                        tracing::warn!(message = message.as_str(), "Broker rejected handshake");
                        return Err(NextStep::Retry);
                    }
                    Ok(Some(ServerMessage::Message { message })) => self.deliver(message),
                    Ok(Some(_)) => {}
                    Ok(None) => return Err(NextStep::Retry),
                    Err(e) => {
                        tracing::warn!(error = %e, "Connection lost during handshake");
                        return Err(NextStep::Retry);
                    }
                }
            }
        }
    }

    /// Fetch and surface history, answering commands while the fetch runs.
    ///
    /// A close arriving mid-fetch abandons the fetch; its result is never
    /// applied. Store failure is a warning, not a session failure.
    async fn load_history(&mut self) -> std::result::Result<(), NextStep> {
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let fetch = async move { store.fetch_history(&key).await };
        tokio::pin!(fetch);

        let result = loop {
            tokio::select! {
                result = &mut fetch => break result,
                command = self.commands.recv() => {
                    if Self::close_requested(command) {
                        return Err(NextStep::Shutdown);
                    }
                }
            }
        };

        match result {
            Ok(history) => {
                let mut fresh: Vec<ChatMessage> = history
                    .into_iter()
                    .filter(|message| self.seen.insert(message.id.clone()))
                    .collect();
                fresh.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
                tracing::debug!(count = fresh.len(), "History loaded");
                self.emit(SessionEvent::HistoryLoaded(fresh));
            }
            Err(e) => {
                tracing::warn!(error = %e, "History fetch failed; continuing live-only");
                self.emit(SessionEvent::StoreWarning(e.to_string()));
            }
        }
        Ok(())
    }

    /// Connected steady state: relay frames out, surface deliveries in.
    async fn live_loop(&mut self, link: &mut Box<dyn TransportLink>) -> NextStep {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Send { body, reply }) => {
                        match self.publish(link, &body).await {
                            Ok(()) => {
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                let lost = matches!(e, Error::Transport(_));
                                let _ = reply.send(Err(e));
                                if lost {
                                    return NextStep::Retry;
                                }
                            }
                        }
                    }
                    Some(SessionCommand::Close) | None => {
                        let _ = link.close().await;
                        return NextStep::Shutdown;
                    }
                },
                frame = link.recv() => match frame {
                    Ok(Some(ServerMessage::Message { message })) => self.deliver(message),
                    Ok(Some(ServerMessage::Ack { id })) => {
                        tracing::debug!(id = id.as_str(), "Publish acknowledged");
                    }
                    Ok(Some(ServerMessage::Pong)) => {}
                    Ok(Some(ServerMessage::Error { message })) => {
                        tracing::warn!(message = message.as_str(), "Broker error");
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        tracing::info!("Broker closed the connection");
                        return NextStep::Retry;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Connection lost");
                        return NextStep::Retry;
                    }
                }
            }
        }
    }

    /// Validate a draft locally and publish it on the live link.
    async fn publish(&self, link: &mut Box<dyn TransportLink>, body: &str) -> Result<()> {
        let sender = self.key.participant(self.config.role);
        let draft = MessageDraft::compose(&self.key, sender, body).validated()?;
        let counterpart = self
            .key
            .participant(self.config.role.counterpart())
            .to_string();

        link.send(ClientMessage::Publish {
            listing_id: draft.listing_id,
            counterpart_email: counterpart,
            role: self.config.role,
            body: draft.body,
        })
        .await
    }

    /// Surface one live delivery, filtering foreign conversations and
    /// dropping ids already seen.
    fn deliver(&mut self, message: ChatMessage) {
        if !self.key.matches(&message) {
            tracing::debug!(
                id = message.id.as_str(),
                "Dropping delivery outside this conversation"
            );
            return;
        }
        if !self.seen.insert(message.id.clone()) {
            return;
        }
        self.emit(SessionEvent::MessageReceived(message));
    }

    /// Wait out the retry delay, still answering commands.
    async fn idle_until_retry(&mut self) -> NextStep {
        let sleep = tokio::time::sleep(self.config.retry_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return NextStep::Retry,
                command = self.commands.recv() => {
                    if Self::close_requested(command) {
                        return NextStep::Shutdown;
                    }
                }
            }
        }
    }

    /// Handle a command in a phase where sends cannot succeed. Returns
    /// whether the session should shut down.
    fn close_requested(command: Option<SessionCommand>) -> bool {
        match command {
            Some(SessionCommand::Send { reply, .. }) => {
                let _ = reply.send(Err(Error::NotConnected));
                false
            }
            Some(SessionCommand::Close) | None => true,
        }
    }

    fn set_state(&self, next: SessionState) {
        let changed = {
            let mut state = self.state.write();
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        };
        if changed {
            self.emit(SessionEvent::StateChanged(next));
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

// ============================================================================
// TESTS
// ============================================================================
