//! Typed identifiers for documents, sessions and presence connections.
//!
//! All ID types wrap a UUID and serialize as standard UUID text — opaque to
//! the remote store, readable in logs. The `short()` form (first 8 hex chars)
//! is for human-facing display only, never a lookup key.
//!
//! [`DocumentId`] is UUIDv7 (time-ordered; new documents sort after old ones).
//! [`SessionId`] and [`ConnectionId`] are UUIDv4 (random): one per open
//! document view and one per presence socket respectively, both used to
//! recognize our own writes coming back at us.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A document identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(uuid::Uuid);

/// A session identifier (UUIDv4, one per open document view).
///
/// Shared-store events carry the writing session's ID so subscribers can
/// ignore their own writes, the way browser storage events never fire in
/// the tab that wrote.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

/// A presence-connection identifier (UUIDv4, fresh per socket connection).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// First 8 hex characters — for human display only, not lookup.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Full 32-character hex string (no hyphens).
            pub fn to_hex(&self) -> String {
                self.0.as_simple().to_string()
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }

            /// A nil / zero ID — for sentinel values only.
            pub fn nil() -> Self {
                Self(uuid::Uuid::nil())
            }

            /// Check if this is the nil ID.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl From<$T> for uuid::Uuid {
            fn from(id: $T) -> uuid::Uuid {
                id.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Full UUID with hyphens for log readability
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(DocumentId, "DocumentId");
impl_typed_id!(SessionId, "SessionId");
impl_typed_id!(ConnectionId, "ConnectionId");

impl DocumentId {
    /// Create a new time-ordered ID (UUIDv7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }
}

impl SessionId {
    /// Create a new random ID (UUIDv4).
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl ConnectionId {
    /// Create a new random ID (UUIDv4). Random rather than time-ordered:
    /// the only requirement is that two connections never collide.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

// ============================================================================
// Tests
// ============================================================================
