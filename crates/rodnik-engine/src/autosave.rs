//! Debounced, deduplicated, retrying document persistence.
//!
//! One coordinator task per open document owns the save pipeline:
//!
//! ```text
//!                 ┌────────────────────────────────────────────┐
//!   edit ──────▶  │ Idle ──▶ Pending ──(debounce)──▶ Saving    │
//!                 │            ▲                    │      │    │
//!                 │            │ newer edit         ok     err  │
//!                 │            │ restarts window    │      ▼    │
//!                 │            └────────────────── Idle  SavingFailed
//!                 │                                        │    │
//!                 │                                (retry delay)─┘
//!                 └────────────────────────────────────────────┘
//! ```
//!
//! Rules the task enforces:
//!
//! - an edit identical to the last-saved content is dropped before anything
//!   else happens (no timer, no write);
//! - every accepted edit is mirrored to the snapshot cache synchronously,
//!   before any network I/O;
//! - edits inside the debounce window coalesce — one PUT, latest content;
//! - a failed save retries after a fixed delay with the same content, but a
//!   newer edit supersedes the retry entirely;
//! - saves are full-document PUTs (title, content, parent, favorite), so
//!   sibling fields must be kept current via [`AutosaveHandle::set_title`] /
//!   [`AutosaveHandle::set_favorite`];
//! - when the last handle drops with unsaved changes, one detached
//!   best-effort save runs before the task exits.
//!
//! The task awaits saves inline, so commands queue during a PUT and are
//! applied after it completes — in-flight content can never be mutated
//! mid-request.

use std::sync::Arc;
use std::time::Duration;

use rodnik_remote::DocumentStore;
use rodnik_types::{BlockDocument, Document, DocumentId, UpdateDocument};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::cache::SnapshotCache;
use crate::constants::{AUTOSAVE_DEBOUNCE, SAVE_RETRY_DELAY};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Timing knobs, defaulting to the production constants.
#[derive(Clone, Debug)]
pub struct AutosaveConfig {
    /// Quiet period after the last edit before the save fires.
    pub debounce: Duration,
    /// Fixed delay before retrying a failed save.
    pub retry_delay: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: AUTOSAVE_DEBOUNCE,
            retry_delay: SAVE_RETRY_DELAY,
        }
    }
}

/// Where the pipeline currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveState {
    /// Nothing to save.
    Idle,
    /// Dirty; debounce window running.
    Pending,
    /// PUT in flight.
    Saving,
    /// Last PUT failed; retry scheduled.
    SavingFailed,
}

/// Save-pipeline notifications for UIs and peers.
#[derive(Clone, Debug)]
pub enum AutosaveEvent {
    /// A save landed. Carries exactly what was persisted, for broadcasting
    /// to collaborators.
    Saved { content: BlockDocument },
    /// A save failed; `attempt` counts consecutive failures for this content.
    SaveFailed { error: String, attempt: u32 },
}

/// The document fields a full-representation PUT carries besides content.
#[derive(Clone, Debug)]
pub struct DocumentFields {
    pub title: String,
    pub parent: Option<DocumentId>,
    pub is_favorite: bool,
}

impl DocumentFields {
    pub fn of(doc: &Document) -> Self {
        Self {
            title: doc.title.clone(),
            parent: doc.parent,
            is_favorite: doc.is_favorite,
        }
    }
}

enum Command {
    Changed(BlockDocument),
    SetTitle { title: String, schedule: bool },
    SetFavorite(bool),
    Flush(Option<oneshot::Sender<()>>),
    Query(oneshot::Sender<SaveState>),
}

/// Cloneable handle to the coordinator task. Dropping the last handle shuts
/// the task down after a final best-effort flush.
#[derive(Clone)]
pub struct AutosaveHandle {
    tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<AutosaveEvent>,
}

impl AutosaveHandle {
    /// Report freshly edited content. Synchronous: the snapshot cache write
    /// and debounce bookkeeping happen on the coordinator task.
    pub fn editor_changed(&self, content: BlockDocument) {
        let _ = self.tx.send(Command::Changed(content));
    }

    /// Update the title carried by subsequent saves and schedule one.
    pub fn set_title(&self, title: impl Into<String>) {
        let _ = self.tx.send(Command::SetTitle {
            title: title.into(),
            schedule: true,
        });
    }

    /// Take on a title that is already persisted (renamed in another view),
    /// so later saves do not revert it. Schedules nothing.
    pub fn absorb_title(&self, title: impl Into<String>) {
        let _ = self.tx.send(Command::SetTitle {
            title: title.into(),
            schedule: false,
        });
    }

    /// Update the favorite flag carried by subsequent saves. Does not
    /// schedule a save — favorite toggles persist through their own PUT.
    pub fn set_favorite(&self, is_favorite: bool) {
        let _ = self.tx.send(Command::SetFavorite(is_favorite));
    }

    /// Save any unsaved state now, skipping the debounce, and wait for the
    /// attempt to finish. Returns immediately when nothing is dirty.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Flush(Some(tx))).is_ok() {
            let _ = rx.await;
        }
    }

    /// Fire-and-forget variant of [`flush`](Self::flush) for teardown paths
    /// that cannot wait.
    pub fn flush_detached(&self) {
        let _ = self.tx.send(Command::Flush(None));
    }

    /// Current pipeline state ([`SaveState::Idle`] once the task is gone).
    pub async fn state(&self) -> SaveState {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Query(tx)).is_err() {
            return SaveState::Idle;
        }
        rx.await.unwrap_or(SaveState::Idle)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutosaveEvent> {
        self.events.subscribe()
    }
}

/// Start the coordinator task for one document.
///
/// `baseline` is the content the view opened with — it counts as saved, so
/// the first change event that merely restates it is dropped.
pub fn spawn(
    document_id: DocumentId,
    store: Arc<dyn DocumentStore>,
    cache: SnapshotCache,
    fields: DocumentFields,
    baseline: BlockDocument,
    config: AutosaveConfig,
) -> AutosaveHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let actor = Actor {
        document_id,
        store,
        cache,
        fields,
        config,
        rx,
        events: events.clone(),
        state: SaveState::Idle,
        last_saved: baseline,
        pending: None,
        dirty_fields: false,
        deadline: None,
        attempt: 0,
    };
    tokio::spawn(actor.run());
    AutosaveHandle { tx, events }
}

struct Actor {
    document_id: DocumentId,
    store: Arc<dyn DocumentStore>,
    cache: SnapshotCache,
    fields: DocumentFields,
    config: AutosaveConfig,
    rx: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<AutosaveEvent>,
    state: SaveState,
    /// Content the server last confirmed (or the open-time baseline).
    last_saved: BlockDocument,
    /// Latest unsaved content; `None` when content is clean.
    pending: Option<BlockDocument>,
    /// Title changed since the last save (content may still be clean).
    dirty_fields: bool,
    /// When the debounce window or retry delay elapses.
    deadline: Option<Instant>,
    /// Consecutive failures for the current unsaved state.
    attempt: u32,
}

impl Actor {
    async fn run(mut self) {
        loop {
            // Disabled arm still needs a live Instant; one day out is fine,
            // the value is recomputed every iteration.
            let deadline = self
                .deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline), if self.deadline.is_some() => {
                    self.deadline = None;
                    if matches!(self.state, SaveState::Pending | SaveState::SavingFailed) {
                        self.save_now().await;
                    }
                }
            }
        }
        // Last handle gone. One detached best-effort save for anything
        // unsaved; no retry after this.
        if self.is_dirty() {
            debug!(document_id = %self.document_id, "final flush on shutdown");
            self.save_now().await;
        }
    }

    fn is_dirty(&self) -> bool {
        self.pending.is_some() || self.dirty_fields
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Changed(content) => self.on_changed(content),
            Command::SetTitle { title, schedule } => {
                if self.fields.title != title {
                    self.fields.title = title;
                    if schedule {
                        self.dirty_fields = true;
                        self.schedule_debounce();
                    }
                }
            }
            Command::SetFavorite(is_favorite) => {
                self.fields.is_favorite = is_favorite;
            }
            Command::Flush(reply) => {
                if self.is_dirty() {
                    self.save_now().await;
                }
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            Command::Query(reply) => {
                let _ = reply.send(self.state);
            }
        }
    }

    fn on_changed(&mut self, content: BlockDocument) {
        if content == self.last_saved {
            // Identical to what the server has. If content was dirty, the
            // user reverted: drop the pending write (and any retry for it).
            // A dirty title keeps its scheduled save, now carrying the
            // reverted content.
            if self.pending.take().is_some() {
                trace!(document_id = %self.document_id, "edit reverted to saved state");
                self.attempt = 0;
                if !self.dirty_fields {
                    self.deadline = None;
                    self.state = SaveState::Idle;
                }
            }
            return;
        }
        // Mirror locally before any network attempt.
        self.cache.write(self.document_id, &content);
        self.pending = Some(content);
        // A newer edit supersedes a scheduled retry of stale content.
        self.attempt = 0;
        self.schedule_debounce();
    }

    fn schedule_debounce(&mut self) {
        self.state = SaveState::Pending;
        self.deadline = Some(Instant::now() + self.config.debounce);
    }

    async fn save_now(&mut self) {
        let content = self
            .pending
            .clone()
            .unwrap_or_else(|| self.last_saved.clone());
        self.state = SaveState::Saving;
        self.deadline = None;
        let body = UpdateDocument {
            title: self.fields.title.clone(),
            content: content.to_value(),
            parent: self.fields.parent,
            is_favorite: self.fields.is_favorite,
        };
        match self.store.update(self.document_id, body).await {
            Ok(_) => {
                self.last_saved = content.clone();
                self.pending = None;
                self.dirty_fields = false;
                self.attempt = 0;
                self.state = SaveState::Idle;
                self.cache.write(self.document_id, &content);
                debug!(document_id = %self.document_id, "document saved");
                let _ = self.events.send(AutosaveEvent::Saved { content });
            }
            Err(error) => {
                self.attempt += 1;
                self.state = SaveState::SavingFailed;
                self.deadline = Some(Instant::now() + self.config.retry_delay);
                warn!(
                    document_id = %self.document_id,
                    error = %error,
                    attempt = self.attempt,
                    "save failed, retry scheduled"
                );
                let _ = self.events.send(AutosaveEvent::SaveFailed {
                    error: error.to_string(),
                    attempt: self.attempt,
                });
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
