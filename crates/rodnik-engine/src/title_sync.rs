//! Cross-session notifications: titles, favorites, list refreshes.
//!
//! Sessions coordinate through shared-store writes under well-known keys;
//! this module is the typed layer over those raw string values. Publishing
//! writes the record *and* fans out locally in the same call — store events
//! never reach the writing session (see `shared_store`), but in-view
//! components (an open sidebar, nested-document blocks in the same view)
//! still need to hear about their own session's changes.
//!
//! Consumer contract: delivery is at-least-once and lossy under pressure,
//! records carry absolute state plus a timestamp, and handlers must be
//! idempotent — applied twice, a record changes nothing the second time.

use rodnik_types::{DocumentId, now_ms};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::constants::{FAVORITE_KEY, REFRESH_KEY, TITLE_KEY_PREFIX};
use crate::shared_store::{StoreEvent, TabStore};

const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// A decoded cross-session notification.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// A document was renamed; update denormalized title copies.
    TitleChanged {
        document_id: DocumentId,
        title: String,
        timestamp: i64,
    },
    /// A document's favorite flag flipped.
    FavoriteChanged {
        document_id: DocumentId,
        is_favorite: bool,
        timestamp: i64,
    },
    /// Something coarse changed (create/delete); refetch document lists.
    DocumentsChanged { timestamp: i64 },
}

// Wire records, exactly as other sessions (and older builds) write them.

#[derive(Serialize, Deserialize)]
struct TitleRecord {
    id: DocumentId,
    title: String,
    timestamp: i64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteRecord {
    document_id: DocumentId,
    is_favorite: bool,
    timestamp: i64,
}

#[derive(Serialize, Deserialize)]
struct RefreshRecord {
    timestamp: i64,
}

/// One session's publisher/subscriber for cross-session notifications.
pub struct TitleSync {
    tab: TabStore,
    local: broadcast::Sender<Notification>,
    forwarder: JoinHandle<()>,
}

impl TitleSync {
    /// Start decoding foreign store events for this session.
    pub fn new(tab: TabStore) -> Self {
        let (local, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let mut foreign = tab.subscribe_foreign();
        let fanout = local.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match foreign.recv().await {
                    Ok(event) => {
                        if let Some(notification) = decode(&event) {
                            let _ = fanout.send(notification);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Lossy by contract; consumers resync on the next record.
                        warn!(skipped, "notification stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self {
            tab,
            local,
            forwarder,
        }
    }

    /// Announce a rename to every session, this one included.
    pub fn notify_title_changed(&self, document_id: DocumentId, title: &str) {
        let timestamp = now_ms();
        let record = TitleRecord {
            id: document_id,
            title: title.to_string(),
            timestamp,
        };
        self.publish(&format!("{TITLE_KEY_PREFIX}{document_id}"), &record);
        let _ = self.local.send(Notification::TitleChanged {
            document_id,
            title: title.to_string(),
            timestamp,
        });
    }

    /// Announce a favorite toggle to every session, this one included.
    pub fn notify_favorite_changed(&self, document_id: DocumentId, is_favorite: bool) {
        let timestamp = now_ms();
        let record = FavoriteRecord {
            document_id,
            is_favorite,
            timestamp,
        };
        self.publish(FAVORITE_KEY, &record);
        let _ = self.local.send(Notification::FavoriteChanged {
            document_id,
            is_favorite,
            timestamp,
        });
    }

    /// Announce that document lists should be refetched.
    pub fn notify_documents_changed(&self) {
        let timestamp = now_ms();
        self.publish(REFRESH_KEY, &RefreshRecord { timestamp });
        let _ = self.local.send(Notification::DocumentsChanged { timestamp });
    }

    /// Notifications from every session, own announcements included.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.local.subscribe()
    }

    fn publish<T: Serialize>(&self, key: &str, record: &T) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(error) => {
                warn!(key, error = %error, "notification serialization failed");
                return;
            }
        };
        if let Err(error) = self.tab.set(key, json) {
            // Peers miss this one; they resync on the next write.
            warn!(key, error = %error, "notification write failed");
        }
    }
}

impl Drop for TitleSync {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Decode a foreign store event into a notification, if it is one.
/// Snapshot-cache keys and unknown keys decode to `None`.
fn decode(event: &StoreEvent) -> Option<Notification> {
    let value = event.value.as_deref()?;
    if event.key.starts_with(TITLE_KEY_PREFIX) {
        match serde_json::from_str::<TitleRecord>(value) {
            Ok(record) => Some(Notification::TitleChanged {
                document_id: record.id,
                title: record.title,
                timestamp: record.timestamp,
            }),
            Err(error) => {
                trace!(key = %event.key, error = %error, "skipping malformed title record");
                None
            }
        }
    } else if event.key == FAVORITE_KEY {
        match serde_json::from_str::<FavoriteRecord>(value) {
            Ok(record) => Some(Notification::FavoriteChanged {
                document_id: record.document_id,
                is_favorite: record.is_favorite,
                timestamp: record.timestamp,
            }),
            Err(error) => {
                trace!(error = %error, "skipping malformed favorite record");
                None
            }
        }
    } else if event.key == REFRESH_KEY {
        match serde_json::from_str::<RefreshRecord>(value) {
            Ok(record) => Some(Notification::DocumentsChanged {
                timestamp: record.timestamp,
            }),
            Err(error) => {
                trace!(error = %error, "skipping malformed refresh record");
                None
            }
        }
    } else {
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
