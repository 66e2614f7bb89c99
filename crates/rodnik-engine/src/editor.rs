//! Block editor adapter: owned content, change events, render suppression.
//!
//! The editor holds the canonical in-session copy of a document's content
//! and is the boundary between two directions of data flow:
//!
//! ```text
//!   user edits ──▶ set_content / insert_block / update_block ──▶ change event
//!   remote updates ──▶ render ──▶ (no event)
//! ```
//!
//! `render` applying remote content **without** emitting a change event is
//! the core invariant — a remote update that re-entered the save path would
//! ping-pong between collaborators forever. Block-level mutations made
//! through this API do emit, even when the engine itself is the caller
//! (linking a created child, healing a stale title): those are genuine
//! content changes that must reach the saver.
//!
//! A [`Mount`] is the attachment point, holding at most one live editor —
//! re-opening a document view must tear the old editor down first, never
//! stack a second one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rodnik_types::{Block, BlockDocument, DocumentId};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::cache::SnapshotCache;

/// Change events are content snapshots; slow consumers drop intermediate
/// snapshots and catch up on the next, which is safe — saves only ever
/// want the latest.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EditorError {
    /// The mount point already has a live editor attached.
    #[error("mount point already has a live editor")]
    MountOccupied,
    /// Operation on an editor that was torn down.
    #[error("editor already destroyed")]
    Destroyed,
    /// Block-level operation addressed a missing index.
    #[error("no block at index {0}")]
    NoSuchBlock(usize),
}

/// An attachment point for one editor instance.
///
/// Cloneable token shared between whoever opens views; attachment is
/// exclusive until the attached editor is destroyed or dropped.
#[derive(Clone, Default)]
pub struct Mount {
    occupied: Arc<AtomicBool>,
}

impl Mount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an editor is currently attached.
    pub fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::Acquire)
    }

    fn acquire(&self) -> bool {
        self.occupied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.occupied.store(false, Ordering::Release);
    }
}

struct EditorState {
    content: BlockDocument,
    destroyed: bool,
    /// Runs once on destroy. Backends without explicit teardown simply never
    /// install one; destroy stays safe either way.
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

/// The live editor for one open document view.
pub struct BlockEditor {
    mount: Mount,
    state: Mutex<EditorState>,
    changes: broadcast::Sender<BlockDocument>,
}

impl BlockEditor {
    /// Attach a new editor to `mount` with the given initial content.
    ///
    /// Fails with [`EditorError::MountOccupied`] if a live editor is already
    /// attached — the caller must destroy it first.
    pub fn mount(mount: &Mount, initial: BlockDocument) -> Result<Arc<Self>, EditorError> {
        if !mount.acquire() {
            return Err(EditorError::MountOccupied);
        }
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Arc::new(Self {
            mount: mount.clone(),
            state: Mutex::new(EditorState {
                content: initial,
                destroyed: false,
                teardown: None,
            }),
            changes,
        }))
    }

    /// Install a hook that runs exactly once when the editor is destroyed.
    pub fn on_teardown(&self, hook: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        if state.destroyed {
            // Too late; run it now so resources still get released.
            drop(state);
            hook();
            return;
        }
        state.teardown = Some(Box::new(hook));
    }

    /// Snapshot of the current content. Works even after destroy, so
    /// teardown paths can still read the final state.
    pub fn content(&self) -> BlockDocument {
        self.state.lock().content.clone()
    }

    /// Subscribe to change events (user edits and block-level mutations;
    /// never `render`).
    pub fn subscribe(&self) -> broadcast::Receiver<BlockDocument> {
        self.changes.subscribe()
    }

    /// Replace the whole content, as a user edit. Emits a change event.
    pub fn set_content(&self, content: BlockDocument) -> Result<(), EditorError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(EditorError::Destroyed);
        }
        state.content = content.clone();
        drop(state);
        let _ = self.changes.send(content);
        Ok(())
    }

    /// Insert a block at `index` (clamped to the block count). Emits a
    /// change event. Returns the index the block actually landed at.
    pub fn insert_block(&self, index: usize, block: Block) -> Result<usize, EditorError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(EditorError::Destroyed);
        }
        let index = index.min(state.content.blocks.len());
        state.content.blocks.insert(index, block);
        let snapshot = state.content.clone();
        drop(state);
        let _ = self.changes.send(snapshot);
        Ok(index)
    }

    /// Replace the payload of the block at `index`, keeping its kind.
    /// Emits a change event.
    pub fn update_block(&self, index: usize, data: Value) -> Result<(), EditorError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(EditorError::Destroyed);
        }
        let Some(block) = state.content.blocks.get_mut(index) else {
            return Err(EditorError::NoSuchBlock(index));
        };
        block.data = data;
        let snapshot = state.content.clone();
        drop(state);
        let _ = self.changes.send(snapshot);
        Ok(())
    }

    /// Apply remotely produced content. Does **not** emit a change event.
    pub fn render(&self, content: BlockDocument) -> Result<(), EditorError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(EditorError::Destroyed);
        }
        state.content = content;
        Ok(())
    }

    /// Tear the editor down and free the mount point. Idempotent: the first
    /// call returns `true` and runs the teardown hook, later calls return
    /// `false` and do nothing.
    pub fn destroy(&self) -> bool {
        let hook = {
            let mut state = self.state.lock();
            if state.destroyed {
                return false;
            }
            state.destroyed = true;
            state.teardown.take()
        };
        if let Some(hook) = hook {
            hook();
        }
        self.mount.release();
        debug!("editor destroyed");
        true
    }
}

impl Drop for BlockEditor {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Decide what content a freshly opened view starts from.
///
/// A fresh local snapshot beats degenerate server content — the server
/// having lost or emptied a document must not wipe the user's last known
/// state. In every other case the server wins and is normalized as usual.
pub fn resolve_content(
    cache: &SnapshotCache,
    document_id: DocumentId,
    server_content: &Value,
) -> BlockDocument {
    if BlockDocument::is_degenerate(server_content)
        && let Some(cached) = cache.read(document_id)
    {
        info!(document_id = %document_id, "recovered content from local snapshot");
        return cached;
    }
    BlockDocument::normalize(server_content)
}

// ============================================================================
// Tests
// ============================================================================
