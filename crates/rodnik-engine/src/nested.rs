//! Nested-document blocks: lazy child creation and title self-healing.
//!
//! A nested-document block starts life as a placeholder — no child document
//! exists until the block is activated. Activation runs a multi-step
//! protocol against the remote store:
//!
//! ```text
//!   NoIdNew ─────┐
//!   NoIdExisting ┼──▶ Creating ──▶ fetch parent
//!   Error ───────┘        │         create child (parent = this document)
//!     ▲                   │         splice reference into parent content
//!     │                   │         persist parent
//!     └───── any step ────┘              │
//!            fails                       ▼
//!                                     Linked
//! ```
//!
//! The protocol is at-least-once, not transactional: a failure after the
//! child POST leaves an orphan (a child the parent never references), and a
//! retry creates a fresh child rather than adopting the orphan. Orphans are
//! invisible in the document tree and harmless; reconciliation is a server
//! concern.
//!
//! Linked blocks self-heal their denormalized title copy on activation:
//! renames made elsewhere catch up lazily, and the healed title reaches the
//! parent document through the ordinary save path (block updates emit
//! change events).

use std::sync::Arc;
use std::time::Duration;

use rodnik_remote::{DocumentStore, StoreError};
use rodnik_types::{Block, CreateDocument, DocumentId, NestedDocumentRef, UpdateDocument};
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_DOCUMENT_TITLE, NESTED_CREATE_DELAY};
use crate::editor::BlockEditor;

/// Where a nested-document block is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NestedState {
    /// Freshly inserted this session; creation starts automatically.
    NoIdNew,
    /// Loaded from storage without an id (interrupted creation, recovered
    /// content). Creation waits for an explicit activation.
    NoIdExisting,
    /// Creation protocol in flight.
    Creating,
    /// Backed by an existing child document.
    Linked,
    /// A creation step failed; activation retries the whole protocol.
    Error,
}

/// Which protocol step failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateStep {
    FetchParent,
    CreateChild,
    PersistParent,
}

#[derive(Debug, thiserror::Error)]
pub enum NestedDocError {
    #[error("fetching parent document failed: {0}")]
    FetchParent(#[source] StoreError),
    #[error("creating child document failed: {0}")]
    CreateChild(#[source] StoreError),
    #[error("linking child into parent failed: {0}")]
    PersistParent(#[source] StoreError),
    /// The originating block vanished from the live editor.
    #[error(transparent)]
    Editor(#[from] crate::editor::EditorError),
}

impl NestedDocError {
    /// The protocol step that failed, when it was a remote step.
    pub fn step(&self) -> Option<CreateStep> {
        match self {
            Self::FetchParent(_) => Some(CreateStep::FetchParent),
            Self::CreateChild(_) => Some(CreateStep::CreateChild),
            Self::PersistParent(_) => Some(CreateStep::PersistParent),
            Self::Editor(_) => None,
        }
    }
}

/// Everything the creation protocol needs from the owning session.
pub struct NestedContext {
    /// The document the block lives in — the parent-to-be.
    pub parent_id: DocumentId,
    pub store: Arc<dyn DocumentStore>,
    pub editor: Arc<BlockEditor>,
    create_delay: Duration,
}

impl NestedContext {
    pub fn new(parent_id: DocumentId, store: Arc<dyn DocumentStore>, editor: Arc<BlockEditor>) -> Self {
        Self {
            parent_id,
            store,
            editor,
            create_delay: NESTED_CREATE_DELAY,
        }
    }

    /// Override the scheduling delay before creation starts (tests).
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }
}

/// One nested-document block's lifecycle driver.
///
/// Holds the block's index in the parent content, the reference payload,
/// and the observable state. The owning session keeps one per activated
/// block; state for blocks that are never touched stays implicit in their
/// stored payloads.
pub struct NestedDocumentBlock {
    index: usize,
    reference: NestedDocumentRef,
    state: NestedState,
    last_error: Option<String>,
}

impl NestedDocumentBlock {
    /// A block just inserted into the editor this session.
    pub fn inserted(index: usize) -> Self {
        Self {
            index,
            reference: NestedDocumentRef::pending(""),
            state: NestedState::NoIdNew,
            last_error: None,
        }
    }

    /// A block loaded from stored content.
    pub fn loaded(index: usize, reference: NestedDocumentRef) -> Self {
        let state = if reference.is_linked() {
            NestedState::Linked
        } else {
            NestedState::NoIdExisting
        };
        Self {
            index,
            reference,
            state,
            last_error: None,
        }
    }

    pub fn state(&self) -> NestedState {
        self.state
    }

    pub fn reference(&self) -> &NestedDocumentRef {
        &self.reference
    }

    /// Human-readable description of the last failure, for the retry
    /// affordance.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Run the creation protocol. Idempotent once linked: returns the
    /// existing child id without touching the store.
    ///
    /// From [`NestedState::Error`] this retries the whole protocol; a
    /// partially completed earlier run may have left an orphaned child
    /// behind, which is accepted (see module docs).
    pub async fn create_child(&mut self, ctx: &NestedContext) -> Result<DocumentId, NestedDocError> {
        if let Some(existing) = self.reference.id {
            return Ok(existing);
        }
        let first_attempt = self.state == NestedState::NoIdNew;
        self.state = NestedState::Creating;

        // Let the insertion that scheduled us land in the editor first.
        if first_attempt && !ctx.create_delay.is_zero() {
            tokio::time::sleep(ctx.create_delay).await;
        }

        // Parent state comes from the server, not the editor: the splice
        // must build on what is actually persisted.
        let parent = match ctx.store.fetch(ctx.parent_id).await {
            Ok(parent) => parent,
            Err(error) => return Err(self.fail(NestedDocError::FetchParent(error))),
        };

        let child = match ctx
            .store
            .create(CreateDocument::empty(DEFAULT_DOCUMENT_TITLE, Some(ctx.parent_id)))
            .await
        {
            Ok(child) => child,
            Err(error) => return Err(self.fail(NestedDocError::CreateChild(error))),
        };
        debug!(
            parent_id = %ctx.parent_id,
            child_id = %child.id,
            "child document created"
        );

        let reference = NestedDocumentRef::linked(child.id, child.title.clone());
        let mut content = parent.normalized_content();
        content.insert_block(self.index, Block::nested_document(&reference));
        let body = UpdateDocument::from_document(&parent).with_content(content.to_value());
        if let Err(error) = ctx.store.update(ctx.parent_id, body).await {
            // The child now exists unreferenced — an orphan until a retry
            // succeeds with a fresh child.
            warn!(
                parent_id = %ctx.parent_id,
                orphan_id = %child.id,
                "parent persist failed after child creation"
            );
            return Err(self.fail(NestedDocError::PersistParent(error)));
        }

        // Reflect the link in the live editor; the emitted change keeps the
        // save path consistent with what was just persisted.
        if let Err(error) = ctx.editor.update_block(self.index, reference.to_data()) {
            debug!(error = %error, "editor gone before link applied");
        }

        self.reference = reference;
        self.state = NestedState::Linked;
        self.last_error = None;
        info!(parent_id = %ctx.parent_id, child_id = %child.id, "nested document linked");
        Ok(child.id)
    }

    /// Refresh the denormalized title from the child document, updating the
    /// live editor block when it drifted. Returns the fresh title on change.
    ///
    /// Failures are swallowed: healing is opportunistic and the stale copy
    /// remains usable.
    pub async fn refresh_title(&mut self, ctx: &NestedContext) -> Option<String> {
        let child_id = self.reference.id?;
        match ctx.store.fetch(child_id).await {
            Ok(child) if child.title != self.reference.title => {
                debug!(
                    child_id = %child_id,
                    title = %child.title,
                    "healing stale nested-document title"
                );
                self.reference.title = child.title.clone();
                if let Err(error) = ctx.editor.update_block(self.index, self.reference.to_data()) {
                    debug!(error = %error, "editor gone before healed title applied");
                }
                Some(child.title)
            }
            Ok(_) => None,
            Err(error) => {
                debug!(child_id = %child_id, error = %error, "title heal skipped");
                None
            }
        }
    }

    fn fail(&mut self, error: NestedDocError) -> NestedDocError {
        self.state = NestedState::Error;
        self.last_error = Some(error.to_string());
        error
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rodnik_remote::InMemoryDocumentStore;
    use rodnik_types::{BlockDocument, BlockKind, Document};

    use crate::editor::Mount;

    fn seed_parent(store: &InMemoryDocumentStore, content: BlockDocument) -> DocumentId {
        let id = DocumentId::new();
        store.seed(Document {
            id,
            title: "Parent".into(),
            content: content.to_value(),
            parent: None,
            is_favorite: false,
            is_root: true,
            created_at: None,
            updated_at: None,
        });
        id
    }

    fn context(
        parent_id: DocumentId,
        store: Arc<dyn DocumentStore>,
        editor: Arc<BlockEditor>,
    ) -> NestedContext {
        NestedContext::new(parent_id, store, editor).with_create_delay(Duration::ZERO)
    }

    // ── State resolution ────────────────────────────────────────────────

    #[test]
    fn test_loaded_blocks_resolve_state_from_reference() {
        let linked = NestedDocumentBlock::loaded(
            0,
            NestedDocumentRef::linked(DocumentId::new(), "Child"),
        );
        assert_eq!(linked.state(), NestedState::Linked);

        let unlinked = NestedDocumentBlock::loaded(1, NestedDocumentRef::pending("Draft"));
        assert_eq!(unlinked.state(), NestedState::NoIdExisting);

        let fresh = NestedDocumentBlock::inserted(0);
        assert_eq!(fresh.state(), NestedState::NoIdNew);
    }

    // ── Creation protocol ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_links_child_into_parent() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let parent_content =
            BlockDocument::from_blocks(vec![Block::paragraph("intro"), Block::paragraph("outro")]);
        let parent_id = seed_parent(&store, parent_content.clone());
        let editor = BlockEditor::mount(&Mount::new(), parent_content).unwrap();
        let ctx = context(parent_id, store.clone(), editor.clone());

        let mut block = NestedDocumentBlock::inserted(1);
        let child_id = block.create_child(&ctx).await.unwrap();

        assert_eq!(block.state(), NestedState::Linked);
        assert_eq!(block.reference().id, Some(child_id));

        // Child: default title, parented under the originating document.
        let child = store.fetch(child_id).await.unwrap();
        assert_eq!(child.title, "Новый документ");
        assert_eq!(child.parent, Some(parent_id));
        assert!(!child.is_root);

        // Parent on the server: reference spliced at the originating index.
        let parent = store.fetch(parent_id).await.unwrap();
        let persisted = parent.normalized_content();
        assert_eq!(persisted.blocks.len(), 3);
        assert_eq!(persisted.blocks[1].kind, BlockKind::NestedDocument);
        let reference = persisted.blocks[1].nested_ref().unwrap();
        assert_eq!(reference.id, Some(child_id));
        assert_eq!(reference.title, "Новый документ");

        // Live editor block got the same reference.
        let live = editor.content();
        assert_eq!(live.blocks[1].nested_ref().unwrap().id, Some(child_id));
    }

    #[tokio::test]
    async fn test_splice_index_clamps_to_parent_length() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let parent_id = seed_parent(&store, BlockDocument::from_blocks(vec![Block::paragraph("only")]));
        let editor = BlockEditor::mount(&Mount::new(), BlockDocument::empty()).unwrap();
        let ctx = context(parent_id, store.clone(), editor);

        // Index far past the end — editor and server disagreed on length.
        let mut block = NestedDocumentBlock::inserted(10);
        block.create_child(&ctx).await.unwrap();

        let parent = store.fetch(parent_id).await.unwrap();
        let persisted = parent.normalized_content();
        assert_eq!(persisted.blocks.len(), 2);
        assert_eq!(persisted.blocks[1].kind, BlockKind::NestedDocument);
    }

    #[tokio::test]
    async fn test_create_is_idempotent_once_linked() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let parent_id = seed_parent(&store, BlockDocument::empty());
        let editor = BlockEditor::mount(&Mount::new(), BlockDocument::empty()).unwrap();
        let ctx = context(parent_id, store.clone(), editor);

        let mut block = NestedDocumentBlock::inserted(0);
        let first = block.create_child(&ctx).await.unwrap();
        let second = block.create_child(&ctx).await.unwrap();

        assert_eq!(first, second);
        // One child, one linking update.
        assert_eq!(store.created_ids().len(), 1);
    }

    // ── Failure and retry ───────────────────────────────────────────────

    /// Store that fails updates while `failures_left > 0`.
    struct FailingUpdates {
        inner: Arc<InMemoryDocumentStore>,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for FailingUpdates {
        async fn fetch(&self, id: DocumentId) -> Result<Document, StoreError> {
            self.inner.fetch(id).await
        }

        async fn create(&self, body: CreateDocument) -> Result<Document, StoreError> {
            self.inner.create(body).await
        }

        async fn update(&self, id: DocumentId, body: UpdateDocument) -> Result<Document, StoreError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Http {
                    status: 500,
                    message: "boom".into(),
                });
            }
            self.inner.update(id, body).await
        }

        async fn delete(&self, id: DocumentId) -> Result<(), StoreError> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_enters_error_state() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let editor = BlockEditor::mount(&Mount::new(), BlockDocument::empty()).unwrap();
        // Parent never seeded: fetch fails with NotFound.
        let ctx = context(DocumentId::new(), store.clone(), editor);

        let mut block = NestedDocumentBlock::inserted(0);
        let error = block.create_child(&ctx).await.unwrap_err();

        assert_eq!(error.step(), Some(CreateStep::FetchParent));
        assert_eq!(block.state(), NestedState::Error);
        assert!(block.last_error().is_some());
        // Nothing was created.
        assert!(store.created_ids().is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_orphans_child_and_retry_relinks() {
        let inner = Arc::new(InMemoryDocumentStore::new());
        let parent_id = seed_parent(&inner, BlockDocument::empty());
        let store = Arc::new(FailingUpdates {
            inner: inner.clone(),
            failures_left: AtomicUsize::new(1),
        });
        let editor = BlockEditor::mount(&Mount::new(), BlockDocument::empty()).unwrap();
        let ctx = context(parent_id, store, editor);

        let mut block = NestedDocumentBlock::inserted(0);

        // First run: child created, linking PUT fails.
        let error = block.create_child(&ctx).await.unwrap_err();
        assert_eq!(error.step(), Some(CreateStep::PersistParent));
        assert_eq!(block.state(), NestedState::Error);
        assert_eq!(inner.created_ids().len(), 1, "orphan left behind");
        let parent = inner.fetch(parent_id).await.unwrap();
        assert!(parent.normalized_content().blocks.is_empty());

        // Retry: a fresh child, linked this time. The orphan stays.
        let child_id = block.create_child(&ctx).await.unwrap();
        assert_eq!(block.state(), NestedState::Linked);
        assert_eq!(inner.created_ids().len(), 2);
        assert!(inner.created_ids().contains(&child_id));

        let parent = inner.fetch(parent_id).await.unwrap();
        let refs = parent.normalized_content().nested_refs();
        assert_eq!(refs.len(), 1, "exactly the retried child is referenced");
        assert_eq!(refs[0].1.id, Some(child_id));
    }

    // ── Title self-healing ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_refresh_title_heals_drift() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let parent_id = seed_parent(&store, BlockDocument::empty());
        let editor = BlockEditor::mount(&Mount::new(), BlockDocument::empty()).unwrap();
        let ctx = context(parent_id, store.clone(), editor.clone());

        let mut block = NestedDocumentBlock::inserted(0);
        let child_id = block.create_child(&ctx).await.unwrap();

        // The child is renamed elsewhere.
        let child = store.fetch(child_id).await.unwrap();
        let renamed = UpdateDocument {
            title: "Renamed elsewhere".into(),
            ..UpdateDocument::from_document(&child)
        };
        store.update(child_id, renamed).await.unwrap();

        let healed = block.refresh_title(&ctx).await;
        assert_eq!(healed.as_deref(), Some("Renamed elsewhere"));
        assert_eq!(block.reference().title, "Renamed elsewhere");
        // The live editor copy caught up too.
        let live = editor.content();
        assert_eq!(
            live.blocks[0].nested_ref().unwrap().title,
            "Renamed elsewhere"
        );
    }

    #[tokio::test]
    async fn test_refresh_title_noop_when_current() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let parent_id = seed_parent(&store, BlockDocument::empty());
        let editor = BlockEditor::mount(&Mount::new(), BlockDocument::empty()).unwrap();
        let ctx = context(parent_id, store.clone(), editor);

        let mut block = NestedDocumentBlock::inserted(0);
        block.create_child(&ctx).await.unwrap();

        assert_eq!(block.refresh_title(&ctx).await, None);
    }

    #[tokio::test]
    async fn test_refresh_title_swallows_fetch_failure() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let editor = BlockEditor::mount(&Mount::new(), BlockDocument::empty()).unwrap();
        let ctx = context(DocumentId::new(), store.clone(), editor);

        // Linked to a document the store no longer has.
        let mut block = NestedDocumentBlock::loaded(
            0,
            NestedDocumentRef::linked(DocumentId::new(), "Ghost"),
        );
        assert_eq!(block.refresh_title(&ctx).await, None);
        assert_eq!(block.reference().title, "Ghost");
        assert_eq!(block.state(), NestedState::Linked);
    }
}
