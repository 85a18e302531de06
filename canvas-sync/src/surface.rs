//! The editing surface contract, an in-memory canvas, and the fault
//! boundary that keeps a misbehaving surface from taking the session down.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::delta::Delta;
use crate::error::SyncError;
use crate::fault::panic_message;
use crate::guard::{ChangeNotification, ChangeOrigin};
use crate::projection::Vec2;
use crate::record::{Record, RecordId};

/// Callback for content-change notifications.
pub type ChangeListener = Box<dyn Fn(&ChangeNotification) + Send + Sync>;

/// Handle returned by [`EditingSurface::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// What the sync engine needs from the thing the user edits.
///
/// The surface owns the authoritative in-memory record set. Every mutation,
/// user input and merged remote changes alike, produces a notification
/// tagged with its [`ChangeOrigin`].
pub trait EditingSurface: Send + Sync {
    /// Register a content-change listener.
    fn listen(&self, listener: ChangeListener) -> ListenerId;

    /// Returns `false` if the id was unknown.
    fn unlisten(&self, id: ListenerId) -> bool;

    /// Current version of a record.
    fn record(&self, id: &RecordId) -> Option<Record>;

    /// Apply a batch of changes and notify listeners with `origin`.
    fn apply(&self, changes: Delta, origin: ChangeOrigin) -> Result<(), SyncError>;

    /// Pointer position in document coordinates, `None` when outside.
    fn pointer(&self) -> Option<Vec2>;
}

// ───────────────────────────────────────────────────────────────────
// Canvas
// ───────────────────────────────────────────────────────────────────

type SharedListener = Arc<dyn Fn(&ChangeNotification) + Send + Sync>;

#[derive(Default)]
struct CanvasState {
    records: BTreeMap<RecordId, Record>,
    pointer: Option<Vec2>,
}

/// In-memory editing surface.
///
/// `apply` normalizes the incoming batch against what the canvas holds: an
/// "add" of an existing id becomes an update, an update of a missing id
/// becomes an add, no-op writes vanish. Listeners see only the effective
/// change and are called after the record lock is released.
#[derive(Default)]
pub struct Canvas {
    state: Mutex<CanvasState>,
    listeners: Mutex<Vec<(ListenerId, SharedListener)>>,
    next_listener: AtomicU64,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a record as a local edit.
    pub fn put(&self, record: Record) -> Result<(), SyncError> {
        self.apply(Delta::new().with_added(record), ChangeOrigin::Local)
    }

    /// Delete a record as a local edit. Returns whether it existed.
    pub fn remove(&self, id: &RecordId) -> Result<bool, SyncError> {
        let Some(record) = self.record(id) else {
            return Ok(false);
        };
        self.apply(Delta::new().with_removed(record), ChangeOrigin::Local)?;
        Ok(true)
    }

    /// Pointer moves are not content changes and notify nobody.
    pub fn set_pointer(&self, position: Vec2) {
        self.lock_state().pointer = Some(position);
    }

    pub fn clear_pointer(&self) {
        self.lock_state().pointer = None;
    }

    pub fn len(&self) -> usize {
        self.lock_state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.lock_state().records.contains_key(id)
    }

    /// All records, ordered by id.
    pub fn records(&self) -> Vec<Record> {
        self.lock_state().records.values().cloned().collect()
    }

    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CanvasState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, SharedListener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `incoming` into the map, recording the effective change.
    fn upsert(records: &mut BTreeMap<RecordId, Record>, incoming: Record, effective: &mut Delta) {
        match records.get(&incoming.id) {
            Some(existing) if *existing == incoming => {}
            Some(_) => {
                effective.updated.insert(incoming.id.clone(), incoming.clone());
                records.insert(incoming.id.clone(), incoming);
            }
            None => {
                effective.added.insert(incoming.id.clone(), incoming.clone());
                records.insert(incoming.id.clone(), incoming);
            }
        }
    }
}

impl EditingSurface for Canvas {
    fn listen(&self, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().push((id, Arc::from(listener)));
        id
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn record(&self, id: &RecordId) -> Option<Record> {
        self.lock_state().records.get(id).cloned()
    }

    fn apply(&self, changes: Delta, origin: ChangeOrigin) -> Result<(), SyncError> {
        let mut effective = Delta::new();
        {
            let mut state = self.lock_state();
            for (_, record) in changes.added.into_iter().chain(changes.updated) {
                Self::upsert(&mut state.records, record, &mut effective);
            }
            for id in changes.removed.into_keys() {
                if let Some(last) = state.records.remove(&id) {
                    effective.updated.remove(&id);
                    // Added and removed in one batch: never visible.
                    if effective.added.remove(&id).is_none() {
                        effective.removed.insert(id, last);
                    }
                }
            }
        }

        if effective.is_empty() {
            return Ok(());
        }

        let listeners: Vec<SharedListener> = self
            .lock_listeners()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        let notification = ChangeNotification {
            origin,
            changes: effective,
        };
        for listener in listeners {
            listener(&notification);
        }
        Ok(())
    }

    fn pointer(&self) -> Option<Vec2> {
        self.lock_state().pointer
    }
}

// ───────────────────────────────────────────────────────────────────
// Fault boundary
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryState {
    Healthy,
    /// The surface failed; mutations are refused until `reset`.
    Faulted { message: String },
}

/// Wraps a surface so a panic or error during `apply` is contained.
///
/// After a fault, `apply` returns [`SyncError::Surface`] without touching
/// the inner surface. Reads and listener registration keep working.
pub struct SurfaceBoundary {
    inner: Arc<dyn EditingSurface>,
    state: Mutex<BoundaryState>,
}

impl SurfaceBoundary {
    pub fn new(inner: Arc<dyn EditingSurface>) -> Self {
        Self {
            inner,
            state: Mutex::new(BoundaryState::Healthy),
        }
    }

    pub fn state(&self) -> BoundaryState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.state(), BoundaryState::Faulted { .. })
    }

    /// Leave the faulted state. Returns whether a fault was cleared.
    pub fn reset(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let was_faulted = matches!(*state, BoundaryState::Faulted { .. });
        *state = BoundaryState::Healthy;
        if was_faulted {
            log::info!("Surface boundary reset");
        }
        was_faulted
    }

    fn trip(&self, message: String) -> SyncError {
        log::error!("Editing surface faulted: {message}");
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = BoundaryState::Faulted {
            message: message.clone(),
        };
        SyncError::Surface(message)
    }
}

impl EditingSurface for SurfaceBoundary {
    fn listen(&self, listener: ChangeListener) -> ListenerId {
        self.inner.listen(listener)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.inner.unlisten(id)
    }

    fn record(&self, id: &RecordId) -> Option<Record> {
        self.inner.record(id)
    }

    fn apply(&self, changes: Delta, origin: ChangeOrigin) -> Result<(), SyncError> {
        if let BoundaryState::Faulted { message } = self.state() {
            return Err(SyncError::Surface(format!("surface is faulted: {message}")));
        }

        let inner = &self.inner;
        match std::panic::catch_unwind(AssertUnwindSafe(|| inner.apply(changes, origin))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.trip(e.to_string())),
            Err(payload) => Err(self.trip(format!("panicked: {}", panic_message(payload.as_ref())))),
        }
    }

    fn pointer(&self) -> Option<Vec2> {
        self.inner.pointer()
    }
}
