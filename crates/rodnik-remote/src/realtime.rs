//! Presence wire protocol and WebSocket transport.
//!
//! One socket per open document, JSON text frames, four message types. Every
//! outgoing message carries the sender's [`ConnectionId`] so peers (and the
//! sender itself, when the server fans a message back) can drop echoes.
//!
//! The transport is deliberately dumb: connect, send, receive, close. All
//! policy — announcing, echo suppression, cursor liveness, reconnect
//! backoff — lives in the engine's presence channel, which talks to this
//! module only through the [`PresenceTransport`] seam so tests can swap in
//! an in-process pair.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use rodnik_types::{ConnectionId, CursorPosition, DocumentId};

/// What went wrong on the presence socket.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed presence message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Whether the connection is gone (reconnect) as opposed to one bad
    /// frame (log and keep reading).
    pub fn is_disconnect(&self) -> bool {
        !matches!(self, TransportError::Malformed(_))
    }
}

/// Messages exchanged over a document's presence socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PresenceMessage {
    /// Announce a new connection with its display identity.
    #[serde(rename = "cursor_connect")]
    CursorConnect {
        cursor_id: ConnectionId,
        username: String,
        color: String,
    },
    /// Caret moved (or left the editor: `position: None`).
    #[serde(rename = "cursor_update")]
    CursorUpdate {
        cursor_id: ConnectionId,
        username: String,
        color: String,
        position: Option<CursorPosition>,
    },
    /// Polite goodbye; peers drop the cursor immediately instead of
    /// waiting for liveness expiry.
    #[serde(rename = "cursor_disconnect")]
    CursorDisconnect { cursor_id: ConnectionId },
    /// Full-content broadcast after a successful save.
    #[serde(rename = "document_update")]
    DocumentUpdate {
        sender_id: ConnectionId,
        content: serde_json::Value,
    },
}

impl PresenceMessage {
    /// The connection that produced this message — the echo-suppression tag.
    pub fn origin(&self) -> ConnectionId {
        match self {
            PresenceMessage::CursorConnect { cursor_id, .. }
            | PresenceMessage::CursorUpdate { cursor_id, .. }
            | PresenceMessage::CursorDisconnect { cursor_id } => *cursor_id,
            PresenceMessage::DocumentUpdate { sender_id, .. } => *sender_id,
        }
    }
}

/// An established presence connection.
#[async_trait]
pub trait PresenceConn: Send {
    async fn send(&mut self, msg: &PresenceMessage) -> Result<(), TransportError>;

    /// Next presence message. `Err(Closed)` when the peer hangs up;
    /// `Err(Malformed)` for one undecodable frame (the connection is still
    /// usable).
    async fn recv(&mut self) -> Result<PresenceMessage, TransportError>;

    /// Best-effort close handshake.
    async fn close(&mut self);
}

/// Connector for presence sockets, one connection per document.
#[async_trait]
pub trait PresenceTransport: Send + Sync {
    async fn connect(
        &self,
        document_id: DocumentId,
    ) -> Result<Box<dyn PresenceConn>, TransportError>;
}

// ── WebSocket binding ───────────────────────────────────────────────────────

/// Presence transport over WebSockets: `{base_url}/documents/{id}/`.
pub struct WsPresenceTransport {
    base_url: String,
}

impl WsPresenceTransport {
    /// `base_url` is the socket root, e.g. `ws://host/ws`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    fn socket_url(&self, document_id: DocumentId) -> String {
        format!("{}/documents/{}/", self.base_url, document_id)
    }
}

#[async_trait]
impl PresenceTransport for WsPresenceTransport {
    async fn connect(
        &self,
        document_id: DocumentId,
    ) -> Result<Box<dyn PresenceConn>, TransportError> {
        let url = self.socket_url(document_id);
        let (stream, _) = connect_async(&url).await?;
        tracing::debug!(document_id = %document_id, url = %url, "presence socket connected");
        Ok(Box::new(WsConn { stream }))
    }
}

struct WsConn {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PresenceConn for WsConn {
    async fn send(&mut self, msg: &PresenceMessage) -> Result<(), TransportError> {
        let payload = serde_json::to_string(msg)?;
        self.stream.send(Message::Text(payload.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<PresenceMessage, TransportError> {
        loop {
            match self.stream.next().await {
                None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(TransportError::Socket(e)),
                Some(Ok(Message::Text(frame))) => {
                    return Ok(serde_json::from_str(frame.as_str())?);
                }
                Some(Ok(Message::Close(_))) => return Err(TransportError::Closed),
                // Ping/pong/binary frames carry no presence data.
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    // ── Wire format ─────────────────────────────────────────────────────

    #[test]
    fn test_messages_are_tagged_snake_case() {
        let id = ConnectionId::new();
        let msg = PresenceMessage::CursorUpdate {
            cursor_id: id,
            username: "ann".into(),
            color: "#FF6B6B".into(),
            position: Some(CursorPosition {
                block_index: 0,
                offset: 4,
            }),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "cursor_update");
        assert_eq!(value["position"]["blockIndex"], 0);

        let disconnect = PresenceMessage::CursorDisconnect { cursor_id: id };
        assert_eq!(
            serde_json::to_value(&disconnect).unwrap()["type"],
            "cursor_disconnect"
        );
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = PresenceMessage::DocumentUpdate {
            sender_id: ConnectionId::new(),
            content: serde_json::json!({ "blocks": [] }),
        };
        let text = serde_json::to_string(&msg).unwrap();
        let back: PresenceMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_origin_tag() {
        let id = ConnectionId::new();
        let update = PresenceMessage::DocumentUpdate {
            sender_id: id,
            content: serde_json::Value::Null,
        };
        assert_eq!(update.origin(), id);
        let connect = PresenceMessage::CursorConnect {
            cursor_id: id,
            username: "u".into(),
            color: "#fff".into(),
        };
        assert_eq!(connect.origin(), id);
    }

    #[test]
    fn test_socket_url_shape() {
        let transport = WsPresenceTransport::new("ws://localhost:8000/ws/");
        let id = DocumentId::new();
        assert_eq!(
            transport.socket_url(id),
            format!("ws://localhost:8000/ws/documents/{id}/")
        );
    }

    // ── Loopback socket ─────────────────────────────────────────────────

    /// Echo server: accepts one connection and reflects every text frame.
    async fn spawn_echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await
                && let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await
            {
                while let Some(Ok(frame)) = ws.next().await {
                    if frame.is_text() && ws.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        });
        format!("ws://{addr}/ws")
    }

    #[tokio::test]
    async fn test_ws_send_and_recv_roundtrip() {
        let base = spawn_echo_server().await;
        let transport = WsPresenceTransport::new(base);
        let mut conn = transport.connect(DocumentId::new()).await.unwrap();

        let msg = PresenceMessage::CursorConnect {
            cursor_id: ConnectionId::new(),
            username: "echo-me".into(),
            color: "#4ECDC4".into(),
        };
        conn.send(&msg).await.unwrap();
        let back = tokio::time::timeout(std::time::Duration::from_secs(5), conn.recv())
            .await
            .expect("echo within deadline")
            .unwrap();
        assert_eq!(back, msg);
        conn.close().await;
    }

    #[tokio::test]
    async fn test_recv_reports_closed_when_server_goes_away() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await
                && let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await
            {
                let _ = ws.close(None).await;
            }
        });

        let transport = WsPresenceTransport::new(format!("ws://{addr}"));
        let mut conn = transport.connect(DocumentId::new()).await.unwrap();
        let err = tokio::time::timeout(std::time::Duration::from_secs(5), conn.recv())
            .await
            .expect("close within deadline")
            .unwrap_err();
        assert!(err.is_disconnect());
    }
}
