//! Session-shared key/value store with change events.
//!
//! The store is the coordination surface between sessions on one machine:
//! snapshot cache entries, title broadcasts, favorite broadcasts and refresh
//! pings all live here as string values under well-known keys.
//!
//! Delivery semantics mirror browser storage events:
//!
//! - every write fans out to **other** sessions, at-least-once;
//! - the writing session never hears its own write back (components that
//!   need same-session notification fan out locally, see `title_sync`);
//! - events can be dropped under pressure (slow subscribers lag), so every
//!   consumer must stay correct on loss — the values themselves are
//!   last-write-wins snapshots, never deltas.
//!
//! ```text
//!   session A ──set──▶ ┌─────────────┐ ──event──▶ session B
//!                      │ SharedStore │ ──event──▶ session C
//!   session A ◀──get── └─────────────┘     ✗────▶ session A (filtered)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rodnik_types::SessionId;
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the change-event channel. Slow subscribers past this lag and
/// drop events rather than stalling writers.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors a store write can produce.
#[derive(Debug, thiserror::Error)]
pub enum SharedStoreError {
    /// The backing storage is full. Mirrors a browser's storage quota;
    /// callers that cache opportunistically log this and move on.
    #[error("storage quota exceeded")]
    QuotaExceeded,
}

/// A change notification delivered to subscribers.
#[derive(Clone, Debug)]
pub struct StoreEvent {
    /// The key that changed.
    pub key: String,
    /// The new value, or `None` when the key was removed.
    pub value: Option<String>,
    /// The session that wrote. Subscribers filter their own.
    pub origin: SessionId,
}

/// Shared key/value storage visible to every session in the process.
///
/// Implementors must make `set` visible to `get` before the change event is
/// delivered, so a subscriber reacting to an event always reads the new
/// value (or a newer one).
pub trait SharedStore: Send + Sync {
    /// Write a value. `origin` identifies the writing session.
    fn set(&self, origin: SessionId, key: &str, value: String) -> Result<(), SharedStoreError>;

    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Remove a key. Removing an absent key is a no-op and emits nothing.
    fn remove(&self, origin: SessionId, key: &str);

    /// Subscribe to change events from **all** sessions, own writes included.
    /// Most callers want [`TabStore::subscribe_foreign`] instead.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

// ── In-memory backend ───────────────────────────────────────────────────────

/// Process-local [`SharedStore`] backed by a concurrent map.
///
/// The only backend the engine ships; tests lean on the optional byte quota
/// to exercise the cache's write-failure tolerance.
pub struct MemoryStore {
    items: DashMap<String, String>,
    events: broadcast::Sender<StoreEvent>,
    /// Total value bytes currently stored. Only tracked against `max_bytes`.
    used: AtomicUsize,
    max_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            items: DashMap::new(),
            events,
            used: AtomicUsize::new(0),
            max_bytes: None,
        }
    }

    /// A store that rejects writes once total value bytes exceed `max_bytes`.
    pub fn with_quota(max_bytes: usize) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            ..Self::new()
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn publish(&self, key: &str, value: Option<String>, origin: SessionId) {
        // No receivers is fine; sessions come and go.
        let _ = self.events.send(StoreEvent {
            key: key.to_string(),
            value,
            origin,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStore for MemoryStore {
    fn set(&self, origin: SessionId, key: &str, value: String) -> Result<(), SharedStoreError> {
        if let Some(cap) = self.max_bytes {
            let old_len = self.items.get(key).map(|v| v.len()).unwrap_or(0);
            let projected = self.used.load(Ordering::Relaxed) - old_len + value.len();
            if projected > cap {
                return Err(SharedStoreError::QuotaExceeded);
            }
            self.used.store(projected, Ordering::Relaxed);
        }
        trace!(key, bytes = value.len(), "store set");
        let event_value = Some(value.clone());
        self.items.insert(key.to_string(), value);
        self.publish(key, event_value, origin);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        self.items.get(key).map(|v| v.clone())
    }

    fn remove(&self, origin: SessionId, key: &str) {
        if let Some((_, old)) = self.items.remove(key) {
            if self.max_bytes.is_some() {
                self.used.fetch_sub(old.len(), Ordering::Relaxed);
            }
            trace!(key, "store remove");
            self.publish(key, None, origin);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

// ── Per-session view ────────────────────────────────────────────────────────

/// One session's handle on the shared store.
///
/// Stamps every write with the session's ID and hands out event streams
/// pre-filtered to other sessions' writes.
#[derive(Clone)]
pub struct TabStore {
    store: Arc<dyn SharedStore>,
    session: SessionId,
}

impl TabStore {
    pub fn new(store: Arc<dyn SharedStore>, session: SessionId) -> Self {
        Self { store, session }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn set(&self, key: &str, value: String) -> Result<(), SharedStoreError> {
        self.store.set(self.session, key, value)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }

    pub fn remove(&self, key: &str) {
        self.store.remove(self.session, key)
    }

    /// Change events written by **other** sessions. Browser storage events
    /// never fire in the writing tab; this preserves that contract.
    pub fn subscribe_foreign(&self) -> ForeignEvents {
        ForeignEvents {
            rx: self.store.subscribe(),
            session: self.session,
        }
    }
}

/// Event stream that skips the owning session's writes.
pub struct ForeignEvents {
    rx: broadcast::Receiver<StoreEvent>,
    session: SessionId,
}

impl ForeignEvents {
    /// Next event from another session. Propagates `Lagged` so callers can
    /// log dropped-event windows; loop and call again to continue.
    pub async fn recv(&mut self) -> Result<StoreEvent, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if event.origin != self.session {
                return Ok(event);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn tab(store: &Arc<MemoryStore>) -> TabStore {
        TabStore::new(store.clone() as Arc<dyn SharedStore>, SessionId::new())
    }

    // ── Basic operations ────────────────────────────────────────────────

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        let session = SessionId::new();

        store.set(session, "k", "v".into()).unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v"));

        store.set(session, "k", "v2".into()).unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v2"));

        store.remove(session, "k");
        assert_eq!(store.get("k"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let store = MemoryStore::with_quota(10);
        let session = SessionId::new();

        store.set(session, "a", "12345".into()).unwrap();
        // 5 + 6 > 10
        let err = store.set(session, "b", "123456".into()).unwrap_err();
        assert!(matches!(err, SharedStoreError::QuotaExceeded));
        // Rejected write left nothing behind.
        assert_eq!(store.get("b"), None);

        // Replacing a value only counts the delta.
        store.set(session, "a", "1234567890".into()).unwrap();
    }

    #[test]
    fn test_remove_frees_quota() {
        let store = MemoryStore::with_quota(5);
        let session = SessionId::new();

        store.set(session, "a", "12345".into()).unwrap();
        store.remove(session, "a");
        store.set(session, "b", "12345".into()).unwrap();
    }

    // ── Event delivery ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_foreign_events_skip_own_writes() {
        let store = Arc::new(MemoryStore::new());
        let a = tab(&store);
        let b = tab(&store);

        let mut a_events = a.subscribe_foreign();
        let mut b_events = b.subscribe_foreign();

        a.set("title", "hello".into()).unwrap();

        // B sees A's write.
        let event = timeout(Duration::from_secs(1), b_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key, "title");
        assert_eq!(event.value.as_deref(), Some("hello"));
        assert_eq!(event.origin, a.session());

        // A does not see its own; the next thing it sees is B's write.
        b.set("other", "x".into()).unwrap();
        let event = timeout(Duration::from_secs(1), a_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key, "other");
    }

    #[tokio::test]
    async fn test_removal_event_has_no_value() {
        let store = Arc::new(MemoryStore::new());
        let a = tab(&store);
        let b = tab(&store);

        a.set("k", "v".into()).unwrap();
        let mut b_events = b.subscribe_foreign();
        a.remove("k");

        let event = timeout(Duration::from_secs(1), b_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key, "k");
        assert_eq!(event.value, None);
    }

    #[tokio::test]
    async fn test_removing_absent_key_emits_nothing() {
        let store = Arc::new(MemoryStore::new());
        let a = tab(&store);
        let b = tab(&store);

        let mut b_events = b.subscribe_foreign();
        a.remove("never-set");
        a.set("real", "1".into()).unwrap();

        // First thing B sees is the real write, not a phantom removal.
        let event = timeout(Duration::from_secs(1), b_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key, "real");
    }

    #[tokio::test]
    async fn test_value_visible_before_event_arrives() {
        let store = Arc::new(MemoryStore::new());
        let a = tab(&store);
        let b = tab(&store);

        let mut b_events = b.subscribe_foreign();
        a.set("k", "v".into()).unwrap();

        let event = timeout(Duration::from_secs(1), b_events.recv())
            .await
            .unwrap()
            .unwrap();
        // Reacting to the event, a reader must find the value in place.
        assert_eq!(b.get(&event.key).as_deref(), Some("v"));
    }
}
