//! In-memory binding of the document store contract.
//!
//! Backs integration tests, demos, and offline use. Besides the contract
//! itself it keeps a write journal so tests can assert *how many* writes
//! happened and with which payloads — the autosave properties (dedup,
//! coalescing, retry) are all statements about the write stream.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use rodnik_types::{CreateDocument, Document, DocumentId, UpdateDocument};

use crate::error::StoreError;
use crate::store::DocumentStore;

/// One recorded mutation.
#[derive(Clone, Debug)]
pub enum JournalEntry {
    Created(DocumentId),
    Updated(DocumentId, UpdateDocument),
    Deleted(DocumentId),
}

/// A document store living entirely in process memory.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: DashMap<DocumentId, Document>,
    journal: Mutex<Vec<JournalEntry>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document as-is, bypassing the journal. For test setup.
    pub fn seed(&self, doc: Document) {
        self.docs.insert(doc.id, doc);
    }

    /// Every mutation in order.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().clone()
    }

    /// Update payloads recorded for one document, in order.
    pub fn updates_for(&self, id: DocumentId) -> Vec<UpdateDocument> {
        self.journal
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::Updated(target, body) if *target == id => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    /// How many updates one document received.
    pub fn update_count(&self, id: DocumentId) -> usize {
        self.updates_for(id).len()
    }

    /// Ids assigned by `create`, in order.
    pub fn created_ids(&self) -> Vec<DocumentId> {
        self.journal
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::Created(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Documents currently stored.
    pub fn document_count(&self) -> usize {
        self.docs.len()
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        self.docs.contains_key(&id)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn fetch(&self, id: DocumentId) -> Result<Document, StoreError> {
        self.docs
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn create(&self, body: CreateDocument) -> Result<Document, StoreError> {
        let doc = Document {
            id: DocumentId::new(),
            title: body.title,
            content: body.content,
            parent: body.parent,
            is_favorite: false,
            is_root: body.parent.is_none(),
            created_at: None,
            updated_at: None,
        };
        self.journal.lock().push(JournalEntry::Created(doc.id));
        self.docs.insert(doc.id, doc.clone());
        Ok(doc)
    }

    async fn update(&self, id: DocumentId, body: UpdateDocument) -> Result<Document, StoreError> {
        let mut entry = self.docs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entry.title = body.title.clone();
        entry.content = body.content.clone();
        entry.parent = body.parent;
        entry.is_favorite = body.is_favorite;
        let doc = entry.clone();
        drop(entry);
        self.journal.lock().push(JournalEntry::Updated(id, body));
        Ok(doc)
    }

    async fn delete(&self, id: DocumentId) -> Result<(), StoreError> {
        self.docs
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))?;
        self.journal.lock().push(JournalEntry::Deleted(id));
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
