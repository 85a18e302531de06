//! Session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SyncError;

/// Tunable windows and intervals for one sync session.
///
/// Every field has a default, so a partial JSON object such as
/// `{"debounce_ms": 250}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiescence window before pending local edits are flushed
    pub debounce_ms: u64,
    /// Minimum gap between two presence publishes
    pub presence_throttle_ms: u64,
    /// How often the local pointer is sampled
    pub presence_sample_interval_ms: u64,
    /// Presence records older than this are hidden
    pub presence_stale_after_ms: u64,
    /// Per-frame retention factor for remote cursor easing, in `[0, 1)`.
    /// 0 snaps straight to the reported position.
    pub cursor_smoothing: f64,
    /// Flush pending edits on close instead of discarding them
    pub flush_on_close: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            presence_throttle_ms: 100,
            presence_sample_interval_ms: 100,
            presence_stale_after_ms: 60_000,
            cursor_smoothing: 0.85,
            flush_on_close: false,
        }
    }
}

impl SyncConfig {
    /// Parse from a JSON document and validate.
    pub fn from_json(text: &str) -> Result<Self, SyncError> {
        let config: SyncConfig =
            serde_json::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject zero intervals and an out-of-range smoothing factor.
    pub fn validate(&self) -> Result<(), SyncError> {
        let intervals = [
            ("debounce_ms", self.debounce_ms),
            ("presence_sample_interval_ms", self.presence_sample_interval_ms),
            ("presence_stale_after_ms", self.presence_stale_after_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(SyncError::Config(format!("{name} must be greater than zero")));
            }
        }
        if !(0.0..1.0).contains(&self.cursor_smoothing) {
            return Err(SyncError::Config(format!(
                "cursor_smoothing must be in [0, 1), got {}",
                self.cursor_smoothing
            )));
        }
        Ok(())
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn presence_throttle(&self) -> Duration {
        Duration::from_millis(self.presence_throttle_ms)
    }

    pub fn presence_sample_interval(&self) -> Duration {
        Duration::from_millis(self.presence_sample_interval_ms)
    }

    pub fn presence_stale_after(&self) -> Duration {
        Duration::from_millis(self.presence_stale_after_ms)
    }
}
