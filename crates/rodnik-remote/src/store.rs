//! The document store contract.
//!
//! Four operations, mirroring the REST surface one-to-one. Updates carry the
//! full representation (see [`UpdateDocument`]) — the store has no partial
//! patch, and the engine is built around re-sending everything it knows.

use async_trait::async_trait;

use rodnik_types::{CreateDocument, Document, DocumentId, UpdateDocument};

use crate::error::StoreError;

/// Remote document store: the single source of truth.
///
/// Implementations must be safe to share across sessions (`Send + Sync`);
/// the engine holds one instance behind an `Arc` for the whole process.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// `GET /documents/{id}/`
    async fn fetch(&self, id: DocumentId) -> Result<Document, StoreError>;

    /// `POST /documents/` — the store assigns the id.
    async fn create(&self, body: CreateDocument) -> Result<Document, StoreError>;

    /// `PUT /documents/{id}/` — full representation, last write wins.
    async fn update(&self, id: DocumentId, body: UpdateDocument) -> Result<Document, StoreError>;

    /// `DELETE /documents/{id}/` — callers strip parent references first.
    async fn delete(&self, id: DocumentId) -> Result<(), StoreError>;
}
