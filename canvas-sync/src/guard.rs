//! Origin tagging and the loop guard.
//!
//! The inbound merger applies store changes through the same surface API
//! user edits go through. Without the guard every inbound change would be
//! re-detected as a local edit and pushed back, amplifying forever.

use crate::delta::Delta;

/// Where a surface mutation came from. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOrigin {
    /// Direct user input on this client
    Local,
    /// Applied by the inbound merger from the store
    Remote,
}

/// One content-change notification from the editing surface.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    pub origin: ChangeOrigin,
    pub changes: Delta,
}

impl ChangeNotification {
    pub fn local(changes: Delta) -> Self {
        Self {
            origin: ChangeOrigin::Local,
            changes,
        }
    }

    pub fn remote(changes: Delta) -> Self {
        Self {
            origin: ChangeOrigin::Remote,
            changes,
        }
    }
}

/// Counters for guard decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardStats {
    pub passed: u64,
    pub dropped: u64,
}

/// Admits local notifications to the outbound path; drops remote ones.
#[derive(Debug, Default)]
pub struct LoopGuard {
    stats: GuardStats,
}

impl LoopGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the changes to buffer, or `None` for remote-origin input.
    pub fn admit<'a>(&mut self, notification: &'a ChangeNotification) -> Option<&'a Delta> {
        match notification.origin {
            ChangeOrigin::Local => {
                self.stats.passed += 1;
                Some(&notification.changes)
            }
            ChangeOrigin::Remote => {
                self.stats.dropped += 1;
                log::trace!(
                    "Loop guard dropped remote notification ({} records)",
                    notification.changes.len()
                );
                None
            }
        }
    }

    pub fn stats(&self) -> GuardStats {
        self.stats
    }
}
