//! Live collaboration channel: remote content, collaborator cursors.
//!
//! Disabled by default — everything else in the engine works without it.
//! When enabled, one task per open document owns the socket and runs the
//! whole protocol:
//!
//! - announce ourselves (`cursor_connect`) on every (re)connection;
//! - forward caret moves and saved content to peers;
//! - surface peer updates as [`PresenceEvent`]s, with our own frames
//!   filtered out — the server fans every frame out to all connections,
//!   sender included, and applying an echoed `document_update` would
//!   re-render content we just saved;
//! - keep the cursor registry fresh, sweeping out peers that went silent;
//! - reconnect with exponential backoff, a bounded number of times, then
//!   give up for the rest of the session. Exhaustion is deliberately quiet:
//!   editing and saving continue, only the live cues stop.
//!
//! Content received here goes to the editor via `render` (no change event);
//! content sent here comes from successful saves, not raw edits — peers see
//! persisted states only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rodnik_remote::{PresenceConn, PresenceMessage, PresenceTransport};
use rodnik_types::{
    ConnectionId, CursorPosition, DocumentId, RemoteCursor, now_ms, random_color,
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::constants::{
    CURSOR_SWEEP_INTERVAL, CURSOR_TTL, DEFAULT_USERNAME, MAX_RECONNECT_ATTEMPTS,
    RECONNECT_BASE_DELAY,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Identity and timing knobs for one session's presence channel.
#[derive(Clone, Debug)]
pub struct PresenceConfig {
    /// Display name sent to peers.
    pub username: String,
    /// Cursor color; `None` picks one from the shared palette.
    pub color: Option<String>,
    pub reconnect_base: Duration,
    pub max_reconnect_attempts: u32,
    pub cursor_sweep_interval: Duration,
    /// How long a peer cursor stays without a fresh update.
    pub cursor_ttl: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            username: DEFAULT_USERNAME.to_string(),
            color: None,
            reconnect_base: RECONNECT_BASE_DELAY,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            cursor_sweep_interval: CURSOR_SWEEP_INTERVAL,
            cursor_ttl: CURSOR_TTL,
        }
    }
}

/// Connection lifecycle, as far as consumers care.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    /// About to make connection attempt number `attempt` (1-based, counted
    /// across the current disconnection).
    Reconnecting { attempt: u32 },
    /// Gave up; no further attempts this session.
    Disconnected,
}

/// What the channel surfaces to the owning session.
#[derive(Clone, Debug)]
pub enum PresenceEvent {
    /// A peer saved; this content should be rendered (never re-saved).
    RemoteContent(Value),
    /// The visible collaborator cursors changed.
    CursorsChanged(Vec<RemoteCursor>),
    Status(ConnectionStatus),
}

enum PresenceCommand {
    UpdateCursor(Option<CursorPosition>),
    BroadcastContent(Value),
}

/// Owning handle for one document's presence channel. Dropping it
/// disconnects politely (`cursor_disconnect`, close handshake).
pub struct PresenceChannel {
    connection_id: ConnectionId,
    commands: mpsc::UnboundedSender<PresenceCommand>,
    events: broadcast::Sender<PresenceEvent>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl PresenceChannel {
    /// The id peers know us by — the tag our own frames come back with.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    /// Report our caret position (`None` = caret left the editor).
    pub fn update_cursor(&self, position: Option<CursorPosition>) {
        let _ = self.commands.send(PresenceCommand::UpdateCursor(position));
    }

    /// Broadcast freshly persisted content to peers.
    pub fn broadcast_content(&self, content: Value) {
        let _ = self
            .commands
            .send(PresenceCommand::BroadcastContent(content));
    }

    /// A lightweight cloneable sender for forwarder tasks.
    pub fn sender(&self) -> PresenceSender {
        PresenceSender {
            commands: self.commands.clone(),
        }
    }
}

impl Drop for PresenceChannel {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Cloneable command-only handle (no lifecycle ownership).
#[derive(Clone)]
pub struct PresenceSender {
    commands: mpsc::UnboundedSender<PresenceCommand>,
}

impl PresenceSender {
    pub fn update_cursor(&self, position: Option<CursorPosition>) {
        let _ = self.commands.send(PresenceCommand::UpdateCursor(position));
    }

    pub fn broadcast_content(&self, content: Value) {
        let _ = self
            .commands
            .send(PresenceCommand::BroadcastContent(content));
    }
}

/// Start the presence task for one document.
pub fn spawn(
    document_id: DocumentId,
    transport: Arc<dyn PresenceTransport>,
    config: PresenceConfig,
) -> PresenceChannel {
    let connection_id = ConnectionId::new();
    let color = config
        .color
        .clone()
        .unwrap_or_else(|| random_color().to_string());
    let (commands, rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let actor = Actor {
        document_id,
        transport,
        config,
        connection_id,
        color,
        rx,
        events: events.clone(),
        shutdown: shutdown_rx,
        cursors: HashMap::new(),
        attempt: 0,
        ever_connected: false,
    };
    tokio::spawn(actor.run());
    PresenceChannel {
        connection_id,
        commands,
        events,
        shutdown: Some(shutdown_tx),
    }
}

enum Connect {
    Ready(Box<dyn PresenceConn>),
    GaveUp,
    Shutdown,
}

struct Actor {
    document_id: DocumentId,
    transport: Arc<dyn PresenceTransport>,
    config: PresenceConfig,
    connection_id: ConnectionId,
    color: String,
    rx: mpsc::UnboundedReceiver<PresenceCommand>,
    events: broadcast::Sender<PresenceEvent>,
    shutdown: oneshot::Receiver<()>,
    cursors: HashMap<ConnectionId, RemoteCursor>,
    /// Failed attempts across the current disconnection.
    attempt: u32,
    ever_connected: bool,
}

impl Actor {
    async fn run(mut self) {
        'lifecycle: loop {
            let mut conn = match self.connect().await {
                Connect::Ready(conn) => conn,
                Connect::GaveUp => {
                    self.emit(PresenceEvent::Status(ConnectionStatus::Disconnected));
                    return;
                }
                Connect::Shutdown => return,
            };

            let hello = PresenceMessage::CursorConnect {
                cursor_id: self.connection_id,
                username: self.config.username.clone(),
                color: self.color.clone(),
            };
            if conn.send(&hello).await.is_err() {
                warn!(document_id = %self.document_id, "presence announce failed");
                self.attempt += 1;
                continue 'lifecycle;
            }
            self.attempt = 0;
            self.ever_connected = true;
            self.emit(PresenceEvent::Status(ConnectionStatus::Connected));
            debug!(
                document_id = %self.document_id,
                connection_id = %self.connection_id,
                "presence connected"
            );

            let mut sweep = tokio::time::interval(self.config.cursor_sweep_interval);
            loop {
                tokio::select! {
                    _ = &mut self.shutdown => {
                        let _ = conn
                            .send(&PresenceMessage::CursorDisconnect {
                                cursor_id: self.connection_id,
                            })
                            .await;
                        conn.close().await;
                        return;
                    }
                    cmd = self.rx.recv() => match cmd {
                        Some(PresenceCommand::UpdateCursor(position)) => {
                            let msg = PresenceMessage::CursorUpdate {
                                cursor_id: self.connection_id,
                                username: self.config.username.clone(),
                                color: self.color.clone(),
                                position,
                            };
                            if conn.send(&msg).await.is_err() {
                                continue 'lifecycle;
                            }
                        }
                        Some(PresenceCommand::BroadcastContent(content)) => {
                            let msg = PresenceMessage::DocumentUpdate {
                                sender_id: self.connection_id,
                                content,
                            };
                            if conn.send(&msg).await.is_err() {
                                continue 'lifecycle;
                            }
                        }
                        None => {
                            // Every handle gone; disconnect politely.
                            let _ = conn
                                .send(&PresenceMessage::CursorDisconnect {
                                    cursor_id: self.connection_id,
                                })
                                .await;
                            conn.close().await;
                            return;
                        }
                    },
                    incoming = conn.recv() => match incoming {
                        Ok(message) => self.on_message(message),
                        Err(error) if error.is_disconnect() => {
                            warn!(
                                document_id = %self.document_id,
                                error = %error,
                                "presence connection lost"
                            );
                            continue 'lifecycle;
                        }
                        // One bad frame; the connection is still good.
                        Err(error) => warn!(error = %error, "skipping malformed presence frame"),
                    },
                    _ = sweep.tick() => self.sweep_cursors(),
                }
            }
        }
    }

    /// Connect with exponential backoff. Attempt numbering spans the current
    /// disconnection; a connection that completes its announce resets it.
    async fn connect(&mut self) -> Connect {
        loop {
            if self.attempt >= self.config.max_reconnect_attempts {
                info!(
                    document_id = %self.document_id,
                    "presence reconnect attempts exhausted; live cues off"
                );
                return Connect::GaveUp;
            }
            let delay = if self.attempt == 0 {
                // First try connects immediately — except right after losing
                // an established connection, where one base delay breaks
                // connect/drop flap loops.
                if self.ever_connected {
                    self.config.reconnect_base
                } else {
                    Duration::ZERO
                }
            } else {
                self.config.reconnect_base * 2u32.pow(self.attempt - 1)
            };
            if !delay.is_zero() {
                self.emit(PresenceEvent::Status(ConnectionStatus::Reconnecting {
                    attempt: self.attempt + 1,
                }));
                tokio::select! {
                    _ = &mut self.shutdown => return Connect::Shutdown,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            let result = tokio::select! {
                _ = &mut self.shutdown => return Connect::Shutdown,
                result = self.transport.connect(self.document_id) => result,
            };
            match result {
                Ok(conn) => return Connect::Ready(conn),
                Err(error) => {
                    self.attempt += 1;
                    warn!(
                        document_id = %self.document_id,
                        error = %error,
                        attempt = self.attempt,
                        "presence connect failed"
                    );
                }
            }
        }
    }

    fn on_message(&mut self, message: PresenceMessage) {
        if message.origin() == self.connection_id {
            trace!("ignoring echo of our own frame");
            return;
        }
        match message {
            PresenceMessage::CursorConnect {
                cursor_id,
                username,
                color,
            } => {
                self.cursors.insert(
                    cursor_id,
                    RemoteCursor {
                        id: cursor_id,
                        username,
                        color,
                        position: None,
                        timestamp: now_ms(),
                    },
                );
                self.emit_cursors();
            }
            PresenceMessage::CursorUpdate {
                cursor_id,
                username,
                color,
                position,
            } => {
                self.cursors.insert(
                    cursor_id,
                    RemoteCursor {
                        id: cursor_id,
                        username,
                        color,
                        position,
                        timestamp: now_ms(),
                    },
                );
                self.emit_cursors();
            }
            PresenceMessage::CursorDisconnect { cursor_id } => {
                if self.cursors.remove(&cursor_id).is_some() {
                    self.emit_cursors();
                }
            }
            PresenceMessage::DocumentUpdate { content, .. } => {
                self.emit(PresenceEvent::RemoteContent(content));
            }
        }
    }

    fn sweep_cursors(&mut self) {
        let now = now_ms();
        let ttl = self.config.cursor_ttl.as_millis() as i64;
        let before = self.cursors.len();
        self.cursors.retain(|_, cursor| now - cursor.timestamp < ttl);
        if self.cursors.len() != before {
            trace!(removed = before - self.cursors.len(), "swept stale cursors");
            self.emit_cursors();
        }
    }

    fn emit_cursors(&self) {
        let mut cursors: Vec<RemoteCursor> = self.cursors.values().cloned().collect();
        cursors.sort_by_key(|c| c.id);
        self.emit(PresenceEvent::CursorsChanged(cursors));
    }

    fn emit(&self, event: PresenceEvent) {
        let _ = self.events.send(event);
    }
}

// ============================================================================
// Tests
// ============================================================================
