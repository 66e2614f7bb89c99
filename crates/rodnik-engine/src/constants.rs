//! Engine timing and key-naming constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.
//! Timings are overridable per component through [`AutosaveConfig`] and
//! [`PresenceConfig`]; these are the production defaults.
//!
//! [`AutosaveConfig`]: crate::autosave::AutosaveConfig
//! [`PresenceConfig`]: crate::presence::PresenceConfig

use std::time::Duration;

/// Quiet period after the last edit before the remote save fires.
pub const AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(3000);

/// Fixed delay before retrying a failed save. Deliberately not exponential:
/// document saves are low-rate and a flat retry keeps worst-case data loss
/// bounded at one window.
pub const SAVE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Cached snapshots older than this are treated as absent and evicted on read.
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Base delay for presence reconnect backoff; doubles on each failed attempt.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Presence reconnect attempts before giving up for the rest of the session.
/// Editing keeps working without the socket, so exhaustion is silent.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// How often stale collaborator cursors are swept out.
pub const CURSOR_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// How long a collaborator cursor stays visible without a fresh update.
pub const CURSOR_TTL: Duration = Duration::from_millis(rodnik_types::CURSOR_LIVENESS_MS as u64);

/// Scheduling delay before a freshly inserted nested-document block starts
/// creating its child, so creation never races the block's own insertion
/// landing in the editor.
pub const NESTED_CREATE_DELAY: Duration = Duration::from_millis(100);

/// Title given to documents created through a nested-document block.
pub const DEFAULT_DOCUMENT_TITLE: &str = "Новый документ";

/// Collaborator display name when none is configured.
pub const DEFAULT_USERNAME: &str = "Пользователь";

// ── Shared-store keys ───────────────────────────────────────────────────────
//
// Key shapes are a compatibility surface: other sessions (and older builds)
// match on them literally.

/// Per-document snapshot entries: `document_cache_{document_id}`.
pub const SNAPSHOT_KEY_PREFIX: &str = "document_cache_";

/// Per-document title broadcasts: `document_title_update_{document_id}`.
pub const TITLE_KEY_PREFIX: &str = "document_title_update_";

/// Favorite-flag broadcasts (single well-known key, value carries the id).
pub const FAVORITE_KEY: &str = "favorite_document_updated";

/// Coarse "document list changed, refetch" broadcasts.
pub const REFRESH_KEY: &str = "document_refresh";
