//! Local snapshot cache for document content.
//!
//! Every durable content change is mirrored here *before* the remote write
//! is attempted, so a crash, an offline stretch, or a server that starts
//! returning empty content can all be recovered from the last local state.
//!
//! Two hard rules shape the API:
//!
//! - **writes never fail** from the caller's perspective — quota and
//!   serialization problems are logged and swallowed, saving continues;
//! - **reads are self-cleaning** — stale (older than [`SNAPSHOT_TTL`]) and
//!   malformed entries are evicted on the read that discovers them and
//!   reported as absent.

use rodnik_types::{BlockDocument, DocumentId, now_ms};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{SNAPSHOT_KEY_PREFIX, SNAPSHOT_TTL};
use crate::shared_store::TabStore;

/// Stored entry: the content plus its write time, for TTL checks.
#[derive(Serialize, Deserialize)]
struct CachedSnapshot {
    content: BlockDocument,
    timestamp: i64,
}

/// Per-session handle on the snapshot cache.
#[derive(Clone)]
pub struct SnapshotCache {
    tab: TabStore,
}

impl SnapshotCache {
    pub fn new(tab: TabStore) -> Self {
        Self { tab }
    }

    fn key(document_id: DocumentId) -> String {
        format!("{SNAPSHOT_KEY_PREFIX}{document_id}")
    }

    /// Cache a snapshot of `content`. Never fails: a full or broken store
    /// must not take down the save path that calls this.
    pub fn write(&self, document_id: DocumentId, content: &BlockDocument) {
        let entry = CachedSnapshot {
            content: content.clone(),
            timestamp: now_ms(),
        };
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(error) => {
                warn!(document_id = %document_id, error = %error, "snapshot serialization failed");
                return;
            }
        };
        if let Err(error) = self.tab.set(&Self::key(document_id), json) {
            warn!(document_id = %document_id, error = %error, "snapshot write failed");
        }
    }

    /// The cached snapshot, if one exists and is fresh. Stale and malformed
    /// entries are evicted and reported as absent.
    pub fn read(&self, document_id: DocumentId) -> Option<BlockDocument> {
        let key = Self::key(document_id);
        let raw = self.tab.get(&key)?;
        match serde_json::from_str::<CachedSnapshot>(&raw) {
            Ok(entry) if now_ms() - entry.timestamp < SNAPSHOT_TTL.as_millis() as i64 => {
                Some(entry.content)
            }
            Ok(_) => {
                debug!(document_id = %document_id, "evicting stale snapshot");
                self.tab.remove(&key);
                None
            }
            Err(error) => {
                warn!(document_id = %document_id, error = %error, "evicting malformed snapshot");
                self.tab.remove(&key);
                None
            }
        }
    }

    /// Drop the snapshot for a document (used when the document is deleted).
    pub fn evict(&self, document_id: DocumentId) {
        self.tab.remove(&Self::key(document_id));
    }
}

// ============================================================================
// Tests
// ============================================================================
