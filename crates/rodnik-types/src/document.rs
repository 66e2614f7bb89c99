//! Wire representation of documents and the store request payloads.
//!
//! `content` stays raw JSON on the wire type: the store returns whatever was
//! last written (possibly by an older client), and only
//! [`BlockDocument::normalize`] may turn it into the canonical shape.
//!
//! Updates always carry the **full** document representation — the store
//! offers no partial patch, so a saver must re-send every sibling field it
//! knows (`title`, `parent`, `is_favorite`) alongside the content or risk
//! clobbering them with stale values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::block::BlockDocument;
use crate::ids::DocumentId;

/// A stored document as the remote store returns it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    #[serde(default)]
    pub title: String,
    /// Raw stored content; normalize before use.
    #[serde(default)]
    pub content: Value,
    /// Owning document; `None` means root.
    #[serde(default)]
    pub parent: Option<DocumentId>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Document {
    /// The canonical view of `content`.
    pub fn normalized_content(&self) -> BlockDocument {
        BlockDocument::normalize(&self.content)
    }

    /// Whether the stored content carries nothing worth keeping.
    pub fn has_degenerate_content(&self) -> bool {
        BlockDocument::is_degenerate(&self.content)
    }
}

/// Body of `POST /documents/`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateDocument {
    pub title: String,
    pub content: Value,
    /// Explicitly serialized even when null — a missing field and a root
    /// document are different statements to the store.
    pub parent: Option<DocumentId>,
}

impl CreateDocument {
    /// An empty child of `parent` (or a root document when `None`).
    pub fn empty(title: impl Into<String>, parent: Option<DocumentId>) -> Self {
        Self {
            title: title.into(),
            content: BlockDocument::empty().to_value(),
            parent,
        }
    }
}

/// Body of `PUT /documents/{id}/` — always the full representation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateDocument {
    pub title: String,
    pub content: Value,
    pub parent: Option<DocumentId>,
    pub is_favorite: bool,
}

impl UpdateDocument {
    /// Snapshot every field the store expects from a fetched document.
    pub fn from_document(doc: &Document) -> Self {
        Self {
            title: doc.title.clone(),
            content: doc.content.clone(),
            parent: doc.parent,
            is_favorite: doc.is_favorite,
        }
    }

    /// Same sibling fields, different content.
    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
