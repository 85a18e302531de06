//! Debounced flushing of pending local edits.
//!
//! ```text
//!            absorb                    deadline reached
//!   Idle ───────────► Pending ─────────────────────────► Sending
//!    ▲                 │  ▲ absorb (deadline reset)          │
//!    │                 └──┘                                  │
//!    │        complete, nothing absorbed meanwhile           │
//!    └───────────────────────────────────────────────────────┤
//!                      complete, absorbed meanwhile          │
//!               Pending ◄────────────────────────────────────┘
//! ```
//!
//! The state machine never reads a clock; callers pass `now`. The session
//! drives it from a tokio timer, tests drive it with synthetic instants.

use std::time::Duration;
use tokio::time::Instant;

use crate::delta::{Delta, DeltaBuffer};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Idle,
    Pending,
    Sending,
}

/// Flush outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Snapshots handed to the outbound call
    pub sent: u64,
    /// Windows that closed with nothing left to send
    pub skipped_empty: u64,
    /// Sends that completed with an error
    pub failed: u64,
    /// Record ids dropped by `discard`
    pub discarded: u64,
}

/// Owns the pending change-set and decides when it leaves the client.
pub struct DebouncedFlusher {
    buffer: DeltaBuffer,
    window: Duration,
    deadline: Option<Instant>,
    in_flight: bool,
    stats: FlushStats,
}

impl DebouncedFlusher {
    pub fn new(window: Duration) -> Self {
        Self {
            buffer: DeltaBuffer::new(),
            window,
            deadline: None,
            in_flight: false,
            stats: FlushStats::default(),
        }
    }

    /// Fold `delta` into the pending set and push the deadline out to
    /// `now + window`. Empty deltas are ignored and do not touch the timer.
    pub fn absorb(&mut self, delta: Delta, now: Instant) -> bool {
        if !self.buffer.absorb(delta) {
            return false;
        }
        self.deadline = Some(now + self.window);
        true
    }

    pub fn state(&self) -> FlushState {
        if self.in_flight {
            FlushState::Sending
        } else if self.deadline.is_some() {
            FlushState::Pending
        } else {
            FlushState::Idle
        }
    }

    /// Current quiescence deadline, if a window is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// When the driver should next call [`poll`](Self::poll). `None` while
    /// idle or while a send is in flight.
    pub fn next_wakeup(&self) -> Option<Instant> {
        if self.in_flight {
            None
        } else {
            self.deadline
        }
    }

    /// Close the window if its deadline has passed.
    ///
    /// Returns the snapshot to send and enters `Sending`. The buffer is
    /// already empty when this returns, so edits absorbed during the send
    /// land in the next window. An empty snapshot is counted and dropped.
    pub fn poll(&mut self, now: Instant) -> Option<Delta> {
        if self.in_flight {
            return None;
        }
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return None,
        }
        self.deadline = None;

        let absorbed = self.buffer.absorbed_count();
        let snapshot = self.buffer.take_snapshot();
        if snapshot.is_empty() {
            self.stats.skipped_empty += 1;
            log::debug!("Flush skipped: {absorbed} notifications folded to nothing");
            return None;
        }

        log::debug!(
            "Flushing {} records from {absorbed} notifications (+{} ~{} -{})",
            snapshot.len(),
            snapshot.added.len(),
            snapshot.updated.len(),
            snapshot.removed.len()
        );
        self.in_flight = true;
        self.stats.sent += 1;
        Some(snapshot)
    }

    /// Record the outcome of the in-flight send.
    ///
    /// A failed snapshot is not restored; newer edits keep accumulating and
    /// go out with the next natural flush.
    pub fn complete(&mut self, result: &Result<(), SyncError>) {
        self.in_flight = false;
        if let Err(e) = result {
            self.stats.failed += 1;
            log::warn!("Flush failed, snapshot dropped: {e}");
        }
    }

    /// Take whatever is pending right now, ignoring the deadline.
    ///
    /// Used for flush-on-close. Returns `None` if nothing is pending.
    pub fn take_now(&mut self) -> Option<Delta> {
        self.deadline = None;
        let snapshot = self.buffer.take_snapshot();
        if snapshot.is_empty() {
            return None;
        }
        self.stats.sent += 1;
        Some(snapshot)
    }

    /// Cancel the open window without sending. Returns the number of record
    /// ids thrown away.
    pub fn discard(&mut self) -> usize {
        self.deadline = None;
        let dropped = self.buffer.clear();
        self.stats.discarded += dropped as u64;
        dropped
    }

    pub fn pending(&self) -> &Delta {
        self.buffer.pending()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn stats(&self) -> FlushStats {
        self.stats
    }
}
