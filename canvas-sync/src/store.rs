//! Store contracts and an in-process store.
//!
//! The sync engine only needs two things from durable storage: a record
//! subscription with an async push, and a presence subscription with an
//! async publish. [`MemoryStore`] implements both with one room per
//! document and tokio broadcast fan-out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::delta::Delta;
use crate::error::SyncError;
use crate::presence::PresenceRecord;
use crate::record::{Record, RecordId};

/// One batch from the document store.
///
/// The first batch after subscribing carries the full document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreUpdate {
    /// Records written since the last batch (full state on the first)
    pub records: Vec<Record>,
    /// Ids deleted since the last batch
    pub removed: Vec<RecordId>,
}

impl StoreUpdate {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.removed.is_empty()
    }
}

pub type RecordCallback = Box<dyn Fn(StoreUpdate) + Send + Sync>;
pub type PresenceCallback = Box<dyn Fn(Vec<PresenceRecord>) + Send + Sync>;

/// Live subscription handle. Dropping it unsubscribes.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Durable record storage with change fan-out.
///
/// Delivery is at-least-once with no ordering guarantee beyond eventual.
/// Subscribers also receive their own writes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn subscribe(&self, doc_id: Uuid, on_records: RecordCallback) -> Subscription;

    async fn push_changes(&self, doc_id: Uuid, changes: Delta) -> Result<(), SyncError>;
}

/// Ephemeral per-user presence with full-set fan-out.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// `on_presence` receives every current record on each change.
    fn subscribe_presence(&self, doc_id: Uuid, on_presence: PresenceCallback) -> Subscription;

    async fn publish(
        &self,
        doc_id: Uuid,
        user_id: Uuid,
        record: PresenceRecord,
    ) -> Result<(), SyncError>;
}

// ───────────────────────────────────────────────────────────────────
// MemoryStore
// ───────────────────────────────────────────────────────────────────

const CHANNEL_CAPACITY: usize = 256;

/// Snapshot of [`MemoryStore`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    /// `push_changes` calls, accepted or not
    pub pushes: u64,
    /// `publish` calls, accepted or not
    pub publishes: u64,
    /// Calls refused by failure injection
    pub rejected: u64,
}

#[derive(Default)]
struct AtomicStoreStats {
    pushes: AtomicU64,
    publishes: AtomicU64,
    rejected: AtomicU64,
}

struct Room {
    records: BTreeMap<RecordId, Record>,
    presence: BTreeMap<Uuid, PresenceRecord>,
    record_tx: broadcast::Sender<Arc<StoreUpdate>>,
    presence_tx: broadcast::Sender<Arc<Vec<PresenceRecord>>>,
}

impl Room {
    fn new() -> Self {
        let (record_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (presence_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            records: BTreeMap::new(),
            presence: BTreeMap::new(),
            record_tx,
            presence_tx,
        }
    }

    fn full_update(&self) -> StoreUpdate {
        StoreUpdate {
            records: self.records.values().cloned().collect(),
            removed: Vec::new(),
        }
    }

    fn presence_set(&self) -> Vec<PresenceRecord> {
        self.presence.values().cloned().collect()
    }
}

type SharedRoom = Arc<Mutex<Room>>;

fn lock(room: &SharedRoom) -> std::sync::MutexGuard<'_, Room> {
    room.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process document and presence store.
///
/// Last write wins per record id. Failure injection makes pushes or
/// publishes fail until switched off again.
#[derive(Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<Uuid, SharedRoom>>,
    fail_pushes: AtomicBool,
    fail_publishes: AtomicBool,
    stats: AtomicStoreStats,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn room(&self, doc_id: Uuid) -> SharedRoom {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(room) = rooms.get(&doc_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        rooms
            .entry(doc_id)
            .or_insert_with(|| {
                log::debug!("Created room for document {doc_id}");
                Arc::new(Mutex::new(Room::new()))
            })
            .clone()
    }

    /// Write records directly, as if another client had pushed them.
    pub fn seed(&self, doc_id: Uuid, records: impl IntoIterator<Item = Record>) {
        let mut changes = Delta::new();
        for record in records {
            changes = changes.with_added(record);
        }
        self.commit(doc_id, changes);
    }

    /// Records currently stored for a document, ordered by id.
    pub fn records(&self, doc_id: Uuid) -> Vec<Record> {
        lock(&self.room(doc_id)).records.values().cloned().collect()
    }

    pub fn record(&self, doc_id: Uuid, id: &RecordId) -> Option<Record> {
        lock(&self.room(doc_id)).records.get(id).cloned()
    }

    pub fn presence(&self, doc_id: Uuid) -> Vec<PresenceRecord> {
        lock(&self.room(doc_id)).presence_set()
    }

    pub fn set_fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            pushes: self.stats.pushes.load(Ordering::Relaxed),
            publishes: self.stats.publishes.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn store_presence(&self, doc_id: Uuid, user_id: Uuid, record: PresenceRecord) {
        let room = self.room(doc_id);
        let mut room = lock(&room);
        room.presence.insert(user_id, record);
        let set = Arc::new(room.presence_set());
        let _ = room.presence_tx.send(set);
    }

    /// Apply a change-set and fan out what actually changed.
    fn commit(&self, doc_id: Uuid, changes: Delta) -> usize {
        let room = self.room(doc_id);
        let mut room = lock(&room);

        let mut update = StoreUpdate::default();
        for (id, record) in changes.added.into_iter().chain(changes.updated) {
            room.records.insert(id, record.clone());
            update.records.push(record);
        }
        for id in changes.removed.into_keys() {
            if room.records.remove(&id).is_some() {
                update.removed.push(id);
            }
        }

        if update.is_empty() {
            return 0;
        }
        // No receivers is fine: nobody is subscribed yet.
        room.record_tx.send(Arc::new(update)).unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn subscribe(&self, doc_id: Uuid, on_records: RecordCallback) -> Subscription {
        let room = self.room(doc_id);
        // Snapshot and subscribe under one lock so no write falls between.
        let (initial, mut rx) = {
            let guard = lock(&room);
            (guard.full_update(), guard.record_tx.subscribe())
        };

        let handle = tokio::spawn(async move {
            on_records(initial);
            loop {
                match rx.recv().await {
                    Ok(update) => on_records(update.as_ref().clone()),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!(
                            "Record subscriber for {doc_id} lagged by {skipped} batches, resending full state"
                        );
                        let full = lock(&room).full_update();
                        on_records(full);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Subscription::new(move || handle.abort())
    }

    async fn push_changes(&self, doc_id: Uuid, changes: Delta) -> Result<(), SyncError> {
        self.stats.pushes.fetch_add(1, Ordering::Relaxed);
        if self.fail_pushes.load(Ordering::SeqCst) {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(SyncError::Store(format!("document {doc_id} is unavailable")));
        }

        let changed = changes.len();
        let receivers = self.commit(doc_id, changes);
        log::debug!("Committed {changed} changes to {doc_id}, fanned out to {receivers}");
        Ok(())
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    fn subscribe_presence(&self, doc_id: Uuid, on_presence: PresenceCallback) -> Subscription {
        let room = self.room(doc_id);
        let (initial, mut rx) = {
            let guard = lock(&room);
            (guard.presence_set(), guard.presence_tx.subscribe())
        };

        let handle = tokio::spawn(async move {
            on_presence(initial);
            loop {
                match rx.recv().await {
                    Ok(set) => on_presence(set.as_ref().clone()),
                    Err(RecvError::Lagged(_)) => {
                        let set = lock(&room).presence_set();
                        on_presence(set);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Subscription::new(move || handle.abort())
    }

    async fn publish(
        &self,
        doc_id: Uuid,
        user_id: Uuid,
        record: PresenceRecord,
    ) -> Result<(), SyncError> {
        self.stats.publishes.fetch_add(1, Ordering::Relaxed);
        if self.fail_publishes.load(Ordering::SeqCst) {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(SyncError::Presence(format!("presence for {doc_id} is unavailable")));
        }

        self.store_presence(doc_id, user_id, record);
        Ok(())
    }
}
