//! Record deltas and the folding buffer that keeps them minimal.
//!
//! Fold rules, applied per record id in arrival order:
//! ```text
//! pending     incoming   result
//! ─────────   ────────   ───────────────────────────────
//! added       update     added (latest payload)
//! added       remove     purged (never existed)
//! updated     update     updated (latest payload)
//! updated     remove     removed
//! removed     add        added (revival, remove cleared)
//! removed     update     removed (update ignored)
//! ```
//!
//! A revived record that is removed again goes back to `removed`: the
//! original removal still has to reach the store.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::record::{Record, RecordId};

/// A change-set keyed by record id.
///
/// An id appears in at most one of the three maps. `removed` entries carry
/// the last-known version for auditing; they are never re-applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub added: BTreeMap<RecordId, Record>,
    pub updated: BTreeMap<RecordId, Record>,
    pub removed: BTreeMap<RecordId, Record>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Total number of ids touched.
    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.added.contains_key(id) || self.updated.contains_key(id) || self.removed.contains_key(id)
    }

    pub fn with_added(mut self, record: Record) -> Self {
        self.added.insert(record.id.clone(), record);
        self
    }

    pub fn with_updated(mut self, record: Record) -> Self {
        self.updated.insert(record.id.clone(), record);
        self
    }

    pub fn with_removed(mut self, record: Record) -> Self {
        self.removed.insert(record.id.clone(), record);
        self
    }
}

/// Accumulates notifications into the minimal pending change-set.
///
/// Owned by the [`DebouncedFlusher`](crate::flusher::DebouncedFlusher) for
/// one debounce window at a time; [`take_snapshot`](Self::take_snapshot)
/// hands the set off and leaves the buffer empty.
#[derive(Debug, Default)]
pub struct DeltaBuffer {
    pending: Delta,
    /// Ids whose pending add replaced a pending remove.
    revived: BTreeSet<RecordId>,
    absorbed: u64,
}

impl DeltaBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one notification in: added, then updated, then removed.
    ///
    /// Returns `false` (and changes nothing) for an empty notification.
    pub fn absorb(&mut self, delta: Delta) -> bool {
        if delta.is_empty() {
            return false;
        }
        for (_, record) in delta.added {
            self.absorb_added(record);
        }
        for (_, record) in delta.updated {
            self.absorb_updated(record);
        }
        for (_, record) in delta.removed {
            self.absorb_removed(record);
        }
        self.absorbed += 1;
        true
    }

    fn absorb_added(&mut self, record: Record) {
        let id = record.id.clone();
        if self.pending.removed.remove(&id).is_some() {
            self.revived.insert(id.clone());
        }
        self.pending.updated.remove(&id);
        self.pending.added.insert(id, record);
    }

    fn absorb_updated(&mut self, record: Record) {
        let id = record.id.clone();
        if let Some(added) = self.pending.added.get_mut(&id) {
            *added = record;
        } else if self.pending.removed.contains_key(&id) {
            log::trace!("Ignoring update of removed record {id}");
        } else {
            self.pending.updated.insert(id, record);
        }
    }

    fn absorb_removed(&mut self, record: Record) {
        let id = record.id.clone();
        if self.pending.added.remove(&id).is_some() {
            if self.revived.remove(&id) {
                self.pending.removed.insert(id, record);
            }
            return;
        }
        self.pending.updated.remove(&id);
        self.pending.removed.insert(id, record);
    }

    /// Hand off the pending set and reset to empty.
    pub fn take_snapshot(&mut self) -> Delta {
        self.revived.clear();
        self.absorbed = 0;
        std::mem::take(&mut self.pending)
    }

    /// Drop everything pending. Returns how many ids were discarded.
    pub fn clear(&mut self) -> usize {
        self.take_snapshot().len()
    }

    pub fn pending(&self) -> &Delta {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Notifications folded in since the last snapshot.
    pub fn absorbed_count(&self) -> u64 {
        self.absorbed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shape(id: &str, v: i64) -> Record {
        Record::shape(id, json!({ "v": v }))
    }

    fn add(id: &str, v: i64) -> Delta {
        Delta::new().with_added(shape(id, v))
    }

    fn update(id: &str, v: i64) -> Delta {
        Delta::new().with_updated(shape(id, v))
    }

    fn remove(id: &str, v: i64) -> Delta {
        Delta::new().with_removed(shape(id, v))
    }

    #[test]
    fn test_add_then_remove_cancels() {
        let mut buf = DeltaBuffer::new();
        buf.absorb(add("1", 1));
        buf.absorb(remove("1", 1));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_add_then_update_collapses_to_add() {
        let mut buf = DeltaBuffer::new();
        buf.absorb(add("1", 1));
        buf.absorb(update("1", 2));

        let pending = buf.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.added[&RecordId::from("1")].payload["v"], 2);
    }

    #[test]
    fn test_update_then_update_keeps_latest() {
        let mut buf = DeltaBuffer::new();
        buf.absorb(update("1", 1));
        buf.absorb(update("1", 2));
        buf.absorb(update("1", 3));

        let pending = buf.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.updated[&RecordId::from("1")].payload["v"], 3);
    }

    #[test]
    fn test_update_then_remove_becomes_remove() {
        let mut buf = DeltaBuffer::new();
        buf.absorb(update("1", 1));
        buf.absorb(remove("1", 1));

        let pending = buf.pending();
        assert!(pending.updated.is_empty());
        assert!(pending.removed.contains_key(&RecordId::from("1")));
    }

    #[test]
    fn test_remove_then_add_revives() {
        let mut buf = DeltaBuffer::new();
        buf.absorb(remove("1", 1));
        buf.absorb(add("1", 5));

        let pending = buf.pending();
        assert!(pending.removed.is_empty());
        assert_eq!(pending.added[&RecordId::from("1")].payload["v"], 5);
    }

    #[test]
    fn test_revived_then_removed_keeps_removal() {
        let mut buf = DeltaBuffer::new();
        buf.absorb(remove("1", 1));
        buf.absorb(add("1", 5));
        buf.absorb(remove("1", 5));

        let pending = buf.pending();
        assert!(pending.added.is_empty());
        assert_eq!(pending.removed[&RecordId::from("1")].payload["v"], 5);
    }

    #[test]
    fn test_remove_then_update_ignored() {
        let mut buf = DeltaBuffer::new();
        buf.absorb(remove("1", 1));
        buf.absorb(update("1", 9));

        let pending = buf.pending();
        assert!(pending.updated.is_empty());
        assert_eq!(pending.removed[&RecordId::from("1")].payload["v"], 1);
    }

    #[test]
    fn test_empty_notification_is_noop() {
        let mut buf = DeltaBuffer::new();
        assert!(!buf.absorb(Delta::new()));
        assert!(buf.is_empty());
        assert_eq!(buf.absorbed_count(), 0);
    }

    #[test]
    fn test_id_in_at_most_one_map() {
        let mut buf = DeltaBuffer::new();
        let sequence = [
            update("a", 1),
            add("b", 1),
            remove("a", 1),
            add("a", 2),
            update("a", 3),
            remove("b", 1),
            update("c", 1),
        ];
        for delta in sequence {
            buf.absorb(delta);
        }

        let pending = buf.pending();
        for id in ["a", "b", "c"] {
            let id = RecordId::from(id);
            let hits = [
                pending.added.contains_key(&id),
                pending.updated.contains_key(&id),
                pending.removed.contains_key(&id),
            ]
            .iter()
            .filter(|hit| **hit)
            .count();
            assert!(hits <= 1, "{id} present in {hits} maps");
        }
        assert_eq!(pending.added[&RecordId::from("a")].payload["v"], 3);
        assert!(!pending.contains(&RecordId::from("b")));
        assert!(pending.updated.contains_key(&RecordId::from("c")));
    }

    #[test]
    fn test_take_snapshot_resets() {
        let mut buf = DeltaBuffer::new();
        buf.absorb(add("1", 1));
        buf.absorb(update("2", 1));
        assert_eq!(buf.absorbed_count(), 2);

        let snapshot = buf.take_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(buf.is_empty());
        assert_eq!(buf.absorbed_count(), 0);
    }

    #[test]
    fn test_snapshot_clears_revival_memory() {
        let mut buf = DeltaBuffer::new();
        buf.absorb(remove("1", 1));
        buf.absorb(add("1", 2));
        let _ = buf.take_snapshot();

        // Next window: the add is fresh again, so add+remove cancels.
        buf.absorb(add("1", 3));
        buf.absorb(remove("1", 3));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_single_notification_with_all_three_maps() {
        let mut buf = DeltaBuffer::new();
        let delta = Delta::new()
            .with_added(shape("new", 1))
            .with_updated(shape("old", 2))
            .with_removed(shape("gone", 3));
        buf.absorb(delta);

        let pending = buf.pending();
        assert_eq!(pending.added.len(), 1);
        assert_eq!(pending.updated.len(), 1);
        assert_eq!(pending.removed.len(), 1);
    }

    #[test]
    fn test_clear_reports_discarded() {
        let mut buf = DeltaBuffer::new();
        buf.absorb(add("1", 1));
        buf.absorb(add("2", 1));
        assert_eq!(buf.clear(), 2);
        assert!(buf.is_empty());
    }
}
