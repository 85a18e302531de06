//! One client's sync session for one document.
//!
//! Owns the wiring between surface, stores and presence, plus two
//! background tasks:
//! - the flush loop, which sleeps until the flusher's deadline and pushes
//!   the snapshot
//! - the presence loop, which samples the pointer on a fixed interval
//!
//! Store and surface callbacks hold only a `Weak` to the session state, so
//! a dropped session stops reacting even if a callback is still registered.
//! No lock is held across an `.await`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::delta::Delta;
use crate::error::SyncError;
use crate::fault::{spawn_reported, FaultReporter};
use crate::flusher::{DebouncedFlusher, FlushState, FlushStats};
use crate::guard::{ChangeNotification, GuardStats, LoopGuard};
use crate::merger::InboundMerger;
use crate::presence::{
    epoch_millis, CursorView, PresencePublisher, PresenceSubscriber, PublishStats, UserProfile,
};
use crate::projection::Camera;
use crate::store::{DocumentStore, MemoryStore, PresenceStore, StoreUpdate, Subscription};
use crate::surface::{EditingSurface, ListenerId};

/// Visible sync status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Waiting for the first store batch
    Connecting,
    Synced,
    /// The last push or publish failed
    Error(String),
    Closed,
}

/// External collaborators of a session.
#[derive(Clone)]
pub struct SessionDeps {
    pub surface: Arc<dyn EditingSurface>,
    pub store: Arc<dyn DocumentStore>,
    pub presence: Arc<dyn PresenceStore>,
    pub faults: Arc<FaultReporter>,
}

impl SessionDeps {
    /// Use one [`MemoryStore`] for both records and presence.
    pub fn memory(surface: Arc<dyn EditingSurface>, store: Arc<MemoryStore>) -> Self {
        Self {
            surface,
            store: store.clone(),
            presence: store,
            faults: Arc::new(FaultReporter::new()),
        }
    }

    pub fn with_faults(mut self, faults: Arc<FaultReporter>) -> Self {
        self.faults = faults;
        self
    }
}

/// Diagnostic counters across the whole pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub guard: GuardStats,
    pub flush: FlushStats,
    pub merged_batches: u64,
    pub merge_failures: u64,
    pub presence: PublishStats,
    pub presence_failures: u64,
    /// Remote peers currently tracked
    pub peers: usize,
}

/// What happened to pending edits at close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseReport {
    /// Record ids dropped from the open debounce window
    pub discarded: usize,
    /// Pending edits were pushed instead (`flush_on_close`)
    pub flushed: bool,
}

struct Outbound {
    guard: LoopGuard,
    flusher: DebouncedFlusher,
}

struct Inbound {
    merger: InboundMerger,
    failures: u64,
}

/// Outbound call that can put the session into `Error`.
#[derive(Debug, Clone, Copy)]
enum OutboundPath {
    Push,
    Publish,
}

/// Last unrecovered failure per outbound path.
#[derive(Default)]
struct Failures {
    push: Option<String>,
    publish: Option<String>,
}

impl Failures {
    fn slot(&mut self, path: OutboundPath) -> &mut Option<String> {
        match path {
            OutboundPath::Push => &mut self.push,
            OutboundPath::Publish => &mut self.publish,
        }
    }

    fn outstanding(&self) -> Option<String> {
        self.push.clone().or_else(|| self.publish.clone())
    }
}

struct Shared {
    doc_id: Uuid,
    surface: Arc<dyn EditingSurface>,
    store: Arc<dyn DocumentStore>,
    outbound: Mutex<Outbound>,
    inbound: Mutex<Inbound>,
    publisher: Mutex<PresencePublisher>,
    peers: Mutex<PresenceSubscriber>,
    presence_failures: AtomicU64,
    failures: Mutex<Failures>,
    synced: AtomicBool,
    closing: AtomicBool,
    status: watch::Sender<SyncStatus>,
    /// Wakes the flush loop to re-read the deadline.
    wake: Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// `Closed` is terminal.
    fn set_status(&self, next: SyncStatus) {
        self.status.send_if_modified(|current| {
            if *current == SyncStatus::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Record how a push or publish ended and recompute the status.
    ///
    /// A path stays in `Error` until its own next call succeeds; success on
    /// one path does not hide a failure still outstanding on the other.
    fn record_outcome(&self, path: OutboundPath, result: &Result<(), SyncError>) {
        let outstanding = {
            let mut failures = lock(&self.failures);
            match result {
                Ok(()) => {
                    if failures.slot(path).take().is_some() {
                        log::info!("{path:?} to {} recovered", self.doc_id);
                    }
                    failures.outstanding()
                }
                Err(e) => {
                    let message = e.to_string();
                    *failures.slot(path) = Some(message.clone());
                    Some(message)
                }
            }
        };
        self.settle_status(outstanding);
    }

    fn settle_status(&self, outstanding: Option<String>) {
        match outstanding {
            Some(message) => self.set_status(SyncStatus::Error(message)),
            None if self.synced.load(Ordering::SeqCst) => self.set_status(SyncStatus::Synced),
            None => self.set_status(SyncStatus::Connecting),
        }
    }

    fn on_surface_change(&self, notification: &ChangeNotification) {
        let armed = {
            let mut out = lock(&self.outbound);
            let Outbound { guard, flusher } = &mut *out;
            match guard.admit(notification) {
                Some(changes) => flusher.absorb(changes.clone(), Instant::now()),
                None => false,
            }
        };
        if armed {
            self.wake.notify_one();
        }
    }

    fn on_store_update(&self, update: StoreUpdate) {
        let result = {
            let mut inbound = lock(&self.inbound);
            let result = inbound.merger.apply_remote(self.surface.as_ref(), update);
            if result.is_err() {
                inbound.failures += 1;
            }
            result
        };

        match result {
            Ok(report) if report.initial_sync => {
                self.synced.store(true, Ordering::SeqCst);
                let outstanding = lock(&self.failures).outstanding();
                self.settle_status(outstanding);
                // Edits made while connecting may already be due.
                self.wake.notify_one();
            }
            Ok(_) => {}
            Err(e) => log::error!("Failed to merge remote batch for {}: {e}", self.doc_id),
        }
    }

    /// Flushing waits for the initial sync so a stale local view never
    /// overwrites the store.
    fn next_wakeup(&self) -> Option<Instant> {
        if !self.synced.load(Ordering::SeqCst) {
            return None;
        }
        lock(&self.outbound).flusher.next_wakeup()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn flush_loop(shared: Arc<Shared>) -> Result<(), SyncError> {
    loop {
        if shared.closing.load(Ordering::SeqCst) {
            return Ok(());
        }

        let wakeup = shared.next_wakeup();
        tokio::select! {
            biased;
            _ = shared.wake.notified() => continue,
            _ = sleep_until(wakeup) => {}
        }

        let snapshot = lock(&shared.outbound).flusher.poll(Instant::now());
        let Some(snapshot) = snapshot else {
            continue;
        };

        let result = shared.store.push_changes(shared.doc_id, snapshot).await;
        lock(&shared.outbound).flusher.complete(&result);
        shared.record_outcome(OutboundPath::Push, &result);

        match result {
            Ok(()) => {}
            Err(e) if e.is_transient() => log::warn!("Push to {} failed: {e}", shared.doc_id),
            Err(e) => {
                log::error!("Push to {} failed, stopping outbound flushes: {e}", shared.doc_id);
                return Err(e);
            }
        }
    }
}

async fn presence_loop(
    shared: Arc<Shared>,
    presence: Arc<dyn PresenceStore>,
    interval: Duration,
) -> Result<(), SyncError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if shared.closing.load(Ordering::SeqCst) {
            return Ok(());
        }

        let pointer = shared.surface.pointer();
        let sample = lock(&shared.publisher).sample(pointer, Instant::now(), epoch_millis());
        let Some(record) = sample else {
            continue;
        };

        let result = presence.publish(shared.doc_id, record.user_id, record).await;
        shared.record_outcome(OutboundPath::Publish, &result);

        if let Err(e) = result {
            shared.presence_failures.fetch_add(1, Ordering::Relaxed);
            if !e.is_transient() {
                log::error!("Presence publish to {} failed, stopping sampling: {e}", shared.doc_id);
                return Err(e);
            }
            log::warn!("Presence publish to {} failed: {e}", shared.doc_id);
        }
    }
}

/// A running sync session.
///
/// Must be started inside a tokio runtime. Call [`close`](Self::close) for
/// an orderly teardown; dropping the session stops it without waiting.
pub struct SyncSession {
    shared: Arc<Shared>,
    status_rx: watch::Receiver<SyncStatus>,
    flush_on_close: bool,
    listener: Option<ListenerId>,
    records_sub: Option<Subscription>,
    presence_sub: Option<Subscription>,
    flush_task: Option<JoinHandle<()>>,
    presence_task: Option<JoinHandle<()>>,
}

impl SyncSession {
    pub fn start(
        doc_id: Uuid,
        profile: UserProfile,
        config: SyncConfig,
        deps: SessionDeps,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        let (status_tx, status_rx) = watch::channel(SyncStatus::Connecting);
        let shared = Arc::new(Shared {
            doc_id,
            surface: deps.surface.clone(),
            store: deps.store.clone(),
            outbound: Mutex::new(Outbound {
                guard: LoopGuard::new(),
                flusher: DebouncedFlusher::new(config.debounce_window()),
            }),
            inbound: Mutex::new(Inbound {
                merger: InboundMerger::new(),
                failures: 0,
            }),
            publisher: Mutex::new(PresencePublisher::new(&profile, config.presence_throttle())),
            peers: Mutex::new(PresenceSubscriber::new(
                profile.user_id,
                config.presence_stale_after(),
                config.cursor_smoothing,
            )),
            presence_failures: AtomicU64::new(0),
            failures: Mutex::new(Failures::default()),
            synced: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            status: status_tx,
            wake: Notify::new(),
        });

        let weak = Arc::downgrade(&shared);
        let listener = deps.surface.listen(Box::new(move |notification| {
            if let Some(shared) = weak.upgrade() {
                shared.on_surface_change(notification);
            }
        }));

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let records_sub = deps.store.subscribe(
            doc_id,
            Box::new(move |update| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_store_update(update);
                }
            }),
        );

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let presence_sub = deps.presence.subscribe_presence(
            doc_id,
            Box::new(move |records| {
                if let Some(shared) = weak.upgrade() {
                    lock(&shared.peers).receive(records, epoch_millis());
                }
            }),
        );

        let flush_task = spawn_reported(
            deps.faults.clone(),
            format!("flush:{doc_id}"),
            flush_loop(shared.clone()),
        );
        let presence_task = spawn_reported(
            deps.faults,
            format!("presence:{doc_id}"),
            presence_loop(shared.clone(), deps.presence, config.presence_sample_interval()),
        );

        log::info!(
            "Sync session started for document {doc_id} as {} ({})",
            profile.display_name(),
            profile.user_id
        );

        Ok(Self {
            shared,
            status_rx,
            flush_on_close: config.flush_on_close,
            listener: Some(listener),
            records_sub: Some(records_sub),
            presence_sub: Some(presence_sub),
            flush_task: Some(flush_task),
            presence_task: Some(presence_task),
        })
    }

    pub fn doc_id(&self) -> Uuid {
        self.shared.doc_id
    }

    pub fn status(&self) -> SyncStatus {
        self.status_rx.borrow().clone()
    }

    /// A receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Resolves once the first store batch has been merged.
    pub async fn wait_until_synced(&self) -> Result<(), SyncError> {
        let mut rx = self.status_rx.clone();
        loop {
            if self.shared.synced.load(Ordering::SeqCst) {
                return Ok(());
            }
            let status = rx.borrow_and_update().clone();
            if status == SyncStatus::Closed {
                return Err(SyncError::Closed);
            }
            rx.changed().await.map_err(|_| SyncError::Closed)?;
        }
    }

    pub fn is_synced(&self) -> bool {
        self.shared.synced.load(Ordering::SeqCst)
    }

    pub fn flush_state(&self) -> FlushState {
        lock(&self.shared.outbound).flusher.state()
    }

    /// Edits waiting for the debounce window to close.
    pub fn pending(&self) -> Delta {
        lock(&self.shared.outbound).flusher.pending().clone()
    }

    pub fn stats(&self) -> SessionStats {
        let (guard, flush) = {
            let out = lock(&self.shared.outbound);
            (out.guard.stats(), out.flusher.stats())
        };
        let (merged_batches, merge_failures) = {
            let inbound = lock(&self.shared.inbound);
            (inbound.merger.batches_applied(), inbound.failures)
        };
        SessionStats {
            guard,
            flush,
            merged_batches,
            merge_failures,
            presence: lock(&self.shared.publisher).stats(),
            presence_failures: self.shared.presence_failures.load(Ordering::Relaxed),
            peers: lock(&self.shared.peers).peer_count(),
        }
    }

    /// Ease remote cursors forward by one frame.
    pub fn advance_cursors(&self, dt: Duration) {
        lock(&self.shared.peers).advance(dt);
    }

    /// Remote cursors to draw this frame, projected through `camera`.
    pub fn visible_cursors(&self, camera: &Camera) -> Vec<CursorView> {
        lock(&self.shared.peers).project(camera, epoch_millis())
    }

    /// Orderly teardown.
    ///
    /// Unsubscribes, stops presence sampling, waits for an in-flight push,
    /// then either discards the open debounce window or, with
    /// `flush_on_close`, pushes it. The status ends as `Closed` either way.
    pub async fn close(mut self) -> Result<CloseReport, SyncError> {
        self.begin_shutdown();

        if let Some(task) = self.flush_task.take() {
            if let Err(e) = task.await {
                log::warn!("Flush task for {} ended abnormally: {e}", self.shared.doc_id);
            }
        }

        let (discarded, pending) = {
            let mut out = lock(&self.shared.outbound);
            if self.flush_on_close {
                (0, out.flusher.take_now())
            } else {
                (out.flusher.discard(), None)
            }
        };

        let mut report = CloseReport {
            discarded,
            flushed: false,
        };
        let pushed = match pending {
            Some(snapshot) => {
                let result = self.shared.store.push_changes(self.shared.doc_id, snapshot).await;
                report.flushed = result.is_ok();
                result
            }
            None => Ok(()),
        };

        self.shared.set_status(SyncStatus::Closed);
        if discarded > 0 {
            log::info!(
                "Session for {} closed, {discarded} pending edits discarded",
                self.shared.doc_id
            );
        } else {
            log::info!("Session for {} closed", self.shared.doc_id);
        }

        pushed.map(|()| report)
    }

    /// Stop inbound delivery and background sampling. Idempotent.
    fn begin_shutdown(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);

        if let Some(sub) = self.records_sub.take() {
            sub.cancel();
        }
        if let Some(sub) = self.presence_sub.take() {
            sub.cancel();
        }
        if let Some(listener) = self.listener.take() {
            self.shared.surface.unlisten(listener);
        }
        if let Some(task) = self.presence_task.take() {
            task.abort();
        }
        self.shared.wake.notify_one();
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.begin_shutdown();
        if let Some(task) = self.flush_task.take() {
            task.abort();
        }
        self.shared.set_status(SyncStatus::Closed);
    }
}
