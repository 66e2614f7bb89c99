//! Remote cursors — the ephemeral presence state.
//!
//! Cursors live only in memory on each peer. A peer that stops broadcasting
//! is swept out after [`CURSOR_LIVENESS_MS`]; an explicit disconnect removes
//! it immediately. Nothing here is ever persisted.

use serde::{Deserialize, Serialize};

use crate::ids::ConnectionId;

/// How long a cursor survives without a refresh, in milliseconds.
pub const CURSOR_LIVENESS_MS: i64 = 5_000;

/// Caret location inside the block list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub block_index: u32,
    pub offset: u32,
}

/// A collaborator's cursor as tracked locally.
///
/// `position: None` means the peer is connected but has no caret placed
/// (just opened the document, or clicked outside the editor).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteCursor {
    pub id: ConnectionId,
    pub username: String,
    pub color: String,
    pub position: Option<CursorPosition>,
    /// Local receipt time, epoch milliseconds — liveness, not wire data.
    pub timestamp: i64,
}

impl RemoteCursor {
    /// Whether this cursor has gone stale as of `now_ms`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms - self.timestamp >= CURSOR_LIVENESS_MS
    }
}

/// Cursor colors assigned to connecting peers, one picked at random.
pub const CURSOR_COLORS: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#FFE66D", "#6A0572", "#1A936F", "#FF9F1C", "#7D5BA6", "#3185FC",
    "#FF5964", "#25A18E",
];

/// Pick a cursor color for a new connection.
pub fn random_color() -> &'static str {
    use rand::seq::SliceRandom;
    CURSOR_COLORS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(CURSOR_COLORS[0])
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor_at(timestamp: i64) -> RemoteCursor {
        RemoteCursor {
            id: ConnectionId::new(),
            username: "peer".into(),
            color: CURSOR_COLORS[0].into(),
            position: Some(CursorPosition {
                block_index: 2,
                offset: 14,
            }),
            timestamp,
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let cursor = cursor_at(100_000);
        assert!(!cursor.is_expired(100_000 + CURSOR_LIVENESS_MS - 1));
        assert!(cursor.is_expired(100_000 + CURSOR_LIVENESS_MS));
        assert!(cursor.is_expired(100_000 + CURSOR_LIVENESS_MS + 1));
    }

    #[test]
    fn test_position_serializes_camel_case() {
        let value = serde_json::to_value(CursorPosition {
            block_index: 1,
            offset: 3,
        })
        .unwrap();
        assert_eq!(value["blockIndex"], 1);
        assert_eq!(value["offset"], 3);
    }

    #[test]
    fn test_random_color_is_from_palette() {
        for _ in 0..32 {
            assert!(CURSOR_COLORS.contains(&random_color()));
        }
    }
}
