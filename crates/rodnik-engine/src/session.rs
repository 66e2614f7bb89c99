//! One open document view, wired end to end.
//!
//! [`DocumentSession::open`] fetches the document, resolves its content
//! against the snapshot cache, mounts the editor, and starts the background
//! machinery around it:
//!
//! ```text
//!   user edits ──► BlockEditor ──changes──► autosave ──PUT──► DocumentStore
//!                     │  ▲                     │
//!                     │  │ render       Saved  │
//!                     │  │                     ▼
//!                     │  └───────────────── presence ◄──► peers (WebSocket)
//!                     │
//!                     └── nested-document blocks ──create/heal──► store
//!
//!   TitleSync ◄──► SharedStore (other views in this process/profile)
//! ```
//!
//! The session also republishes what it learns: renames and favorite flips
//! go out over [`TitleSync`], saved content goes to presence peers, and
//! incoming notifications heal this view's own state (nested-reference
//! titles, the carried title/favorite fields).
//!
//! Closing is cooperative: [`close`](DocumentSession::close) flushes unsaved
//! work and waits; plain `Drop` fires the same flush without waiting, which
//! is all a vanishing view can do.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rodnik_remote::{DocumentStore, PresenceTransport, StoreError};
use rodnik_types::{
    Block, BlockDocument, CursorPosition, DocumentId, NestedDocumentRef, SessionId,
    UpdateDocument,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::autosave::{self, AutosaveEvent, AutosaveHandle, DocumentFields, SaveState};
use crate::cache::SnapshotCache;
use crate::config::EngineConfig;
use crate::editor::{BlockEditor, EditorError, Mount, resolve_content};
use crate::nested::{NestedContext, NestedDocError, NestedDocumentBlock};
use crate::presence::{self, PresenceChannel, PresenceEvent};
use crate::shared_store::{SharedStore, TabStore};
use crate::title_sync::{Notification, TitleSync};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Editor(#[from] EditorError),

    #[error(transparent)]
    Nested(#[from] NestedDocError),

    /// The block at this index exists but is not a nested document.
    #[error("block {index} is not a nested document")]
    NotANestedDocument { index: usize },

    /// The block at this index exists but is not a task.
    #[error("block {index} is not a task")]
    NotATask { index: usize },
}

/// Process-wide handles shared by every session: the document store, the
/// shared key-value store, and (optionally) the presence transport.
#[derive(Clone)]
pub struct Workspace {
    store: Arc<dyn DocumentStore>,
    shared: Arc<dyn SharedStore>,
    presence: Option<Arc<dyn PresenceTransport>>,
}

impl Workspace {
    pub fn new(store: Arc<dyn DocumentStore>, shared: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            shared,
            presence: None,
        }
    }

    /// Attach a realtime transport. Sessions still only use it when their
    /// [`EngineConfig`] enables presence.
    pub fn with_presence(mut self, transport: Arc<dyn PresenceTransport>) -> Self {
        self.presence = Some(transport);
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Open a session on `document_id`, mounting its editor on `mount`.
    pub async fn open(
        &self,
        mount: &Mount,
        document_id: DocumentId,
        config: EngineConfig,
    ) -> Result<DocumentSession, SessionError> {
        DocumentSession::open(self, mount, document_id, config).await
    }
}

/// A live editing session on one document.
pub struct DocumentSession {
    session_id: SessionId,
    document_id: DocumentId,
    store: Arc<dyn DocumentStore>,
    cache: SnapshotCache,
    editor: Arc<BlockEditor>,
    autosave: AutosaveHandle,
    title_sync: TitleSync,
    presence: Option<PresenceChannel>,
    fields: Arc<Mutex<DocumentFields>>,
    nested_delay: Duration,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl DocumentSession {
    pub async fn open(
        workspace: &Workspace,
        mount: &Mount,
        document_id: DocumentId,
        config: EngineConfig,
    ) -> Result<Self, SessionError> {
        let document = workspace.store.fetch(document_id).await?;

        let session_id = SessionId::new();
        let tab = TabStore::new(workspace.shared.clone(), session_id);
        let cache = SnapshotCache::new(tab.clone());

        let content = resolve_content(&cache, document_id, &document.content);
        let editor = BlockEditor::mount(mount, content.clone())?;
        let fields = Arc::new(Mutex::new(DocumentFields::of(&document)));
        let autosave = autosave::spawn(
            document_id,
            workspace.store.clone(),
            cache.clone(),
            DocumentFields::of(&document),
            content,
            config.autosave,
        );
        let title_sync = TitleSync::new(tab);
        let presence = match (&workspace.presence, config.presence) {
            (Some(transport), Some(presence_config)) => Some(presence::spawn(
                document_id,
                transport.clone(),
                presence_config,
            )),
            (None, Some(_)) => {
                warn!(document_id = %document_id, "presence enabled but no transport configured");
                None
            }
            _ => None,
        };

        let mut tasks = Vec::new();
        tasks.push(forward_changes(editor.subscribe(), autosave.clone()));
        tasks.push(apply_notifications(
            title_sync.subscribe(),
            document_id,
            editor.clone(),
            autosave.clone(),
            fields.clone(),
        ));
        if let Some(channel) = &presence {
            tasks.push(render_remote_content(channel.subscribe(), editor.clone()));
            tasks.push(publish_saves(autosave.subscribe(), channel.sender()));
        }

        info!(
            document_id = %document_id,
            session_id = %session_id,
            presence = presence.is_some(),
            "session opened"
        );
        Ok(Self {
            session_id,
            document_id,
            store: workspace.store.clone(),
            cache,
            editor,
            autosave,
            title_sync,
            presence,
            fields,
            nested_delay: config.nested_create_delay,
            tasks,
            closed: false,
        })
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn editor(&self) -> &Arc<BlockEditor> {
        &self.editor
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn title(&self) -> String {
        self.fields.lock().title.clone()
    }

    pub fn parent(&self) -> Option<DocumentId> {
        self.fields.lock().parent
    }

    pub fn is_favorite(&self) -> bool {
        self.fields.lock().is_favorite
    }

    /// Cross-view notifications (renames, favorites, list changes).
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.title_sync.subscribe()
    }

    pub fn save_events(&self) -> broadcast::Receiver<AutosaveEvent> {
        self.autosave.subscribe()
    }

    pub async fn save_state(&self) -> SaveState {
        self.autosave.state().await
    }

    /// Presence events, when this session has presence enabled.
    pub fn presence_events(&self) -> Option<broadcast::Receiver<PresenceEvent>> {
        self.presence.as_ref().map(|channel| channel.subscribe())
    }

    // ── Document fields ─────────────────────────────────────────────────

    /// Rename the document. The new title rides the next save, and other
    /// views hear about it immediately.
    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        {
            let mut fields = self.fields.lock();
            if fields.title == title {
                return;
            }
            fields.title = title.clone();
        }
        self.autosave.set_title(title.clone());
        self.title_sync.notify_title_changed(self.document_id, &title);
    }

    /// Flip the favorite flag, optimistically: the local flag changes first,
    /// then one PUT persists it. On failure the flag rolls back and the
    /// error surfaces to the caller.
    pub async fn toggle_favorite(&self) -> Result<bool, StoreError> {
        let (desired, body) = {
            let mut fields = self.fields.lock();
            fields.is_favorite = !fields.is_favorite;
            let body = UpdateDocument {
                title: fields.title.clone(),
                content: self.editor.content().to_value(),
                parent: fields.parent,
                is_favorite: fields.is_favorite,
            };
            (fields.is_favorite, body)
        };
        self.autosave.set_favorite(desired);

        match self.store.update(self.document_id, body).await {
            Ok(_) => {
                self.title_sync
                    .notify_favorite_changed(self.document_id, desired);
                Ok(desired)
            }
            Err(error) => {
                warn!(
                    document_id = %self.document_id,
                    error = %error,
                    "favorite toggle failed; rolling back"
                );
                let restored = {
                    let mut fields = self.fields.lock();
                    fields.is_favorite = !desired;
                    fields.is_favorite
                };
                self.autosave.set_favorite(restored);
                Err(error)
            }
        }
    }

    // ── Task blocks ─────────────────────────────────────────────────────

    /// Flip the checked state of the task block at `index`. Goes through the
    /// editor like any edit, so it autosaves. Returns the new state.
    pub fn toggle_task(&self, index: usize) -> Result<bool, SessionError> {
        let content = self.editor.content();
        let block = content
            .blocks
            .get(index)
            .ok_or(EditorError::NoSuchBlock(index))?;
        let mut task = block.task_data().ok_or(SessionError::NotATask { index })?;
        task.checked = !task.checked;
        self.editor.update_block(index, task.to_data())?;
        Ok(task.checked)
    }

    // ── Nested documents ────────────────────────────────────────────────

    /// Insert a nested-document block at `index` and create its child
    /// document. Returns the child's id once both the child and the updated
    /// parent content are persisted.
    ///
    /// On failure the placeholder block stays in the editor without an id;
    /// [`activate_nested_document`](Self::activate_nested_document) on it
    /// retries with a fresh child.
    pub async fn insert_nested_document(&self, index: usize) -> Result<DocumentId, SessionError> {
        let reference = NestedDocumentRef::pending("");
        let landed = self
            .editor
            .insert_block(index, Block::nested_document(&reference))?;
        let mut nested = NestedDocumentBlock::inserted(landed);
        let child = nested.create_child(&self.nested_context()).await?;
        self.title_sync.notify_documents_changed();
        Ok(child)
    }

    /// Activate the nested-document block at `index` — the open/click path.
    ///
    /// Linked blocks refresh their denormalized title against the store and
    /// return the child id to navigate to. Blocks still without an id (an
    /// interrupted creation, or a failed one) create their child now.
    pub async fn activate_nested_document(&self, index: usize) -> Result<DocumentId, SessionError> {
        let content = self.editor.content();
        let block = content
            .blocks
            .get(index)
            .ok_or(EditorError::NoSuchBlock(index))?;
        let reference = block
            .nested_ref()
            .ok_or(SessionError::NotANestedDocument { index })?;

        let ctx = self.nested_context();
        let mut nested = NestedDocumentBlock::loaded(index, reference);
        if let Some(child_id) = nested.reference().id {
            nested.refresh_title(&ctx).await;
            return Ok(child_id);
        }
        let child = nested.create_child(&ctx).await?;
        self.title_sync.notify_documents_changed();
        Ok(child)
    }

    fn nested_context(&self) -> NestedContext {
        NestedContext::new(self.document_id, self.store.clone(), self.editor.clone())
            .with_create_delay(self.nested_delay)
    }

    // ── Presence ────────────────────────────────────────────────────────

    /// Report our caret position to peers. No-op without presence.
    pub fn update_cursor(&self, position: Option<CursorPosition>) {
        if let Some(presence) = &self.presence {
            presence.update_cursor(position);
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Save any unsaved state now and wait for the attempt.
    pub async fn flush(&self) {
        self.autosave.editor_changed(self.editor.content());
        self.autosave.flush().await;
    }

    /// Delete this document from the store, stripping any reference to it
    /// from the parent first so no dangling link survives. Consumes the
    /// session; on success, returns the parent to navigate to.
    ///
    /// A parent that refuses its update aborts the delete — better a
    /// surviving document with a reference than a reference to nothing.
    pub async fn delete(mut self) -> Result<Option<DocumentId>, StoreError> {
        let parent_id = self.fields.lock().parent;
        if let Some(parent_id) = parent_id {
            match self.store.fetch(parent_id).await {
                Ok(parent) => {
                    let mut parent_content = parent.normalized_content();
                    if parent_content.strip_references(self.document_id) > 0 {
                        let body = UpdateDocument::from_document(&parent)
                            .with_content(parent_content.to_value());
                        self.store.update(parent_id, body).await?;
                    }
                }
                // Orphans have nothing to unlink from.
                Err(StoreError::NotFound(_)) => {}
                Err(error) => return Err(error),
            }
        }
        self.store.delete(self.document_id).await?;
        self.cache.evict(self.document_id);
        self.title_sync.notify_documents_changed();
        info!(document_id = %self.document_id, "document deleted");
        self.teardown(false).await;
        Ok(parent_id)
    }

    /// Close the session: flush unsaved work, disconnect presence, release
    /// the mount.
    pub async fn close(mut self) {
        self.teardown(true).await;
    }

    async fn teardown(&mut self, flush: bool) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if flush {
            // Capture the editor's final state directly; the forwarder task
            // that normally reports changes is already gone.
            self.autosave.editor_changed(self.editor.content());
            self.autosave.flush().await;
        }
        self.closed = true;
        self.presence.take();
        self.editor.destroy();
        debug!(document_id = %self.document_id, session_id = %self.session_id, "session closed");
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if !self.closed {
            // The view is gone and nobody will await us: hand the final
            // state to the coordinator and let it finish on its own.
            self.autosave.editor_changed(self.editor.content());
            self.autosave.flush_detached();
        }
        self.editor.destroy();
    }
}

// ── Forwarder tasks ─────────────────────────────────────────────────────

fn forward_changes(
    mut changes: broadcast::Receiver<BlockDocument>,
    autosave: AutosaveHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(content) => autosave.editor_changed(content),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "dropped editor change events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Apply cross-view notifications to this session: absorb renames and
/// favorite flips of our own document, and heal the denormalized titles of
/// nested-document blocks pointing at the renamed one.
fn apply_notifications(
    mut notifications: broadcast::Receiver<Notification>,
    document_id: DocumentId,
    editor: Arc<BlockEditor>,
    autosave: AutosaveHandle,
    fields: Arc<Mutex<DocumentFields>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let note = match notifications.recv().await {
                Ok(note) => note,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "dropped cross-view notifications");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match note {
                Notification::TitleChanged {
                    document_id: changed,
                    title,
                    ..
                } => {
                    if changed == document_id {
                        fields.lock().title = title.clone();
                        autosave.absorb_title(title.clone());
                    }
                    for (index, reference) in editor.content().nested_refs() {
                        if reference.id == Some(changed) && reference.title != title {
                            let healed = NestedDocumentRef::linked(changed, title.clone());
                            if editor.update_block(index, healed.to_data()).is_err() {
                                break;
                            }
                        }
                    }
                }
                Notification::FavoriteChanged {
                    document_id: changed,
                    is_favorite,
                    ..
                } if changed == document_id => {
                    fields.lock().is_favorite = is_favorite;
                    autosave.set_favorite(is_favorite);
                }
                _ => {}
            }
        }
    })
}

/// Render peer content into the editor. `render` emits no change event, so
/// remote updates never loop back through autosave.
fn render_remote_content(
    mut events: broadcast::Receiver<PresenceEvent>,
    editor: Arc<BlockEditor>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PresenceEvent::RemoteContent(content)) => {
                    if editor.render(BlockDocument::normalize(&content)).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "dropped presence events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Peers see persisted states only: broadcast content on successful saves,
/// not on raw edits.
fn publish_saves(
    mut saves: broadcast::Receiver<AutosaveEvent>,
    peers: presence::PresenceSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match saves.recv().await {
                Ok(AutosaveEvent::Saved { content }) => {
                    peers.broadcast_content(content.to_value());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}
