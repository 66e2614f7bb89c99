//! Document store errors.

use rodnik_types::DocumentId;

/// What went wrong talking to the document store.
///
/// The autosave path treats every variant as transient and retries with
/// backoff; user-initiated actions surface the error to their caller.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store has no document with this id.
    #[error("document {0} not found")]
    NotFound(DocumentId),

    /// The store answered with a non-success status.
    #[error("store returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never completed (DNS, connect, timeout, decode).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}
