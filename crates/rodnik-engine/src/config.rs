//! Engine-wide configuration.
//!
//! Defaults mirror production timings; tests shrink them to keep runs fast.

use std::time::Duration;

use crate::autosave::AutosaveConfig;
use crate::constants::NESTED_CREATE_DELAY;
use crate::presence::PresenceConfig;

/// Configuration for one [`DocumentSession`](crate::session::DocumentSession).
///
/// Presence is opt-in: `presence: None` (the default) turns the whole live
/// collaboration layer off, and the session never touches the realtime
/// transport.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub autosave: AutosaveConfig,
    pub presence: Option<PresenceConfig>,
    /// Grace period before a freshly inserted nested-document block starts
    /// creating its child, letting the surrounding edit settle first.
    pub nested_create_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            autosave: AutosaveConfig::default(),
            presence: None,
            nested_create_delay: NESTED_CREATE_DELAY,
        }
    }
}

impl EngineConfig {
    /// Default configuration with presence enabled.
    pub fn with_presence(presence: PresenceConfig) -> Self {
        Self {
            presence: Some(presence),
            ..Self::default()
        }
    }
}
