//! Shared document and block types for Rodnik.
//!
//! This crate is the data foundation: typed IDs, documents, block documents,
//! block payloads, and presence cursors. It has **no internal rodnik
//! dependencies** and no I/O — a pure leaf crate that the remote bindings and
//! the sync engine build on.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! Document (DocumentId)
//!     └── parent forms the nesting tree (None = root)
//!     └── content is a BlockDocument (or a legacy shape → normalize())
//!
//! BlockDocument
//!     └── ordered Vec<Block> (order = vertical position)
//!
//! Block
//!     └── kind: BlockKind (paragraph, header, task, nestedDocument, …)
//!     └── data: payload JSON, typed views for the kinds the engine edits
//!         └── NestedDocumentRef {id?, title} → child Document
//!         └── TaskData {text, checked, …}
//!
//! RemoteCursor (ConnectionId) ← ephemeral, presence channel only
//! ```
//!
//! # Key Types
//!
//! |---------------------|---------------------------------------------|
//! | Type                | Purpose                                     |
//! |---------------------|---------------------------------------------|
//! | [`DocumentId`]      | Which document (UUIDv7, opaque on the wire) |
//! | [`SessionId`]       | Which open document view (UUIDv4)           |
//! | [`ConnectionId`]    | Which presence connection (UUIDv4)          |
//! | [`Document`]        | Wire representation of a stored document    |
//! | [`BlockDocument`]   | Canonical editor content (time/version/blocks) |
//! | [`Block`]           | One block: kind discriminator + payload     |
//! | [`NestedDocumentRef`] | Reference payload of a nestedDocument block |
//! | [`TaskData`]        | Payload of a task (checklist item) block    |
//! | [`RemoteCursor`]    | Collaborator cursor, 5 s liveness           |
//! |---------------------|---------------------------------------------|

pub mod block;
pub mod cursor;
pub mod document;
pub mod ids;

// Re-export primary types at crate root for convenience.
pub use block::{
    BLOCK_SCHEMA_VERSION, Block, BlockDocument, BlockKind, NestedDocumentRef, TaskData,
};
pub use cursor::{CURSOR_COLORS, CURSOR_LIVENESS_MS, CursorPosition, RemoteCursor, random_color};
pub use document::{CreateDocument, Document, UpdateDocument};
pub use ids::{ConnectionId, DocumentId, SessionId};

/// Current time as Unix milliseconds. Used by constructors throughout the crate.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
