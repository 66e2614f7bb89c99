//! The Rodnik client engine: everything between a block editor view and the
//! document store.
//!
//! One [`session::DocumentSession`] per open document wires the pieces
//! together:
//!
//! ```text
//!              ┌───────────────── DocumentSession ─────────────────┐
//!              │                                                   │
//!   view ◄────►│ editor ──► autosave ──► DocumentStore (REST)      │
//!              │   ▲           │  │                                │
//!              │   │           │  └──► cache (SharedStore)         │
//!              │   │           ▼                                   │
//!              │   └──── presence ◄──► peers (WebSocket, opt-in)   │
//!              │                                                   │
//!              │ title_sync ◄──► other views (SharedStore events)  │
//!              └───────────────────────────────────────────────────┘
//! ```
//!
//! - [`editor`] — the headless block editor contract: content in, change
//!   events out, `render` for remote updates that must not echo.
//! - [`autosave`] — debounced, deduplicated, write-through-cached saves
//!   with bounded-patience retry.
//! - [`cache`] — 24-hour content snapshots in the shared store, read back
//!   when the server returns nothing usable.
//! - [`nested`] — document-inside-document blocks and their at-least-once
//!   creation flow.
//! - [`title_sync`] — cross-view notifications (renames, favorites, list
//!   changes) over shared-store events.
//! - [`presence`] — optional live collaboration: peer cursors and content.
//! - [`shared_store`] — the shared key-value substrate and its per-view
//!   handle.
//!
//! Persistence is sacred, everything else degrades: saves retry until they
//! land, while cache writes, notifications, and presence fail quietly.

pub mod autosave;
pub mod cache;
pub mod config;
pub mod constants;
pub mod editor;
pub mod nested;
pub mod presence;
pub mod session;
pub mod shared_store;
pub mod title_sync;

pub use autosave::{AutosaveConfig, AutosaveEvent, AutosaveHandle, SaveState};
pub use cache::SnapshotCache;
pub use config::EngineConfig;
pub use editor::{BlockEditor, EditorError, Mount};
pub use nested::{NestedDocError, NestedDocumentBlock, NestedState};
pub use presence::{ConnectionStatus, PresenceChannel, PresenceConfig, PresenceEvent};
pub use session::{DocumentSession, SessionError, Workspace};
pub use shared_store::{MemoryStore, SharedStore, StoreEvent, TabStore};
pub use title_sync::{Notification, TitleSync};
