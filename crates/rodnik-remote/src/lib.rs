//! Remote bindings for Rodnik.
//!
//! Two seams, both trait-shaped so the engine never names a concrete
//! transport:
//!
//! - [`DocumentStore`] — the document store contract
//!   (`GET/PUT/POST/DELETE /documents/{id}/`), bound to HTTP by
//!   [`RestDocumentStore`] and to process memory by
//!   [`InMemoryDocumentStore`] (tests, demos, offline).
//! - [`PresenceTransport`] — the best-effort realtime socket, one connection
//!   per open document, bound to WebSockets by [`WsPresenceTransport`].
//!
//! The store is the source of truth and must stay reachable for editing to
//! persist; the presence transport is an optimization and everything above
//! it degrades gracefully when it fails.

pub mod error;
pub mod memory;
pub mod realtime;
pub mod rest;
pub mod store;

pub use error::StoreError;
pub use memory::InMemoryDocumentStore;
pub use realtime::{PresenceConn, PresenceMessage, PresenceTransport, TransportError, WsPresenceTransport};
pub use rest::RestDocumentStore;
pub use store::DocumentStore;
