//! Last-resort fault reporting.
//!
//! Two kinds of fault escape normal `Result` handling: panics, and
//! background tasks that end in an error nobody awaits. Both are logged at
//! `error` and forwarded to any registered observers.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use tokio::task::JoinHandle;

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultSource {
    /// Caught by the process panic hook
    Panic,
    /// A task spawned through [`spawn_reported`], by name
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReport {
    pub source: FaultSource,
    pub message: String,
}

impl FaultReport {
    pub fn panic(message: impl Into<String>) -> Self {
        Self {
            source: FaultSource::Panic,
            message: message.into(),
        }
    }

    pub fn task(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: FaultSource::Task(name.into()),
            message: message.into(),
        }
    }
}

type FaultObserver = Arc<dyn Fn(&FaultReport) + Send + Sync>;

/// Fan-out point for faults nobody else handled.
#[derive(Default)]
pub struct FaultReporter {
    observers: Mutex<Vec<FaultObserver>>,
    reported: AtomicU64,
}

impl FaultReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Observers are called on the faulting thread.
    pub fn observe(&self, observer: impl Fn(&FaultReport) + Send + Sync + 'static) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    pub fn report(&self, report: FaultReport) {
        match &report.source {
            FaultSource::Panic => log::error!("Unhandled panic: {}", report.message),
            FaultSource::Task(name) => log::error!("Task '{name}' failed: {}", report.message),
        }
        self.reported.fetch_add(1, Ordering::Relaxed);

        // Snapshot so observers run without the lock held.
        let observers: Vec<FaultObserver> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer(&report);
        }
    }

    pub fn reported_count(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Install a process-wide panic hook that reports to `reporter`.
///
/// The previously installed hook still runs afterwards, so default panic
/// output is kept.
pub fn install_last_resort_handler(reporter: Arc<FaultReporter>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let mut message = panic_message(info.payload());
        if let Some(location) = info.location() {
            message = format!("{message} at {}:{}", location.file(), location.line());
        }
        reporter.report(FaultReport::panic(message));
        previous(info);
    }));
}

/// Spawn a background task whose error or panic is reported instead of
/// silently dropped with the join handle.
pub fn spawn_reported<F>(
    reporter: Arc<FaultReporter>,
    name: impl Into<String>,
    task: F,
) -> JoinHandle<()>
where
    F: Future<Output = Result<(), SyncError>> + Send + 'static,
{
    let name = name.into();
    tokio::spawn(async move {
        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(Ok(())) => log::debug!("Task '{name}' finished"),
            Ok(Err(e)) => reporter.report(FaultReport::task(name, e.to_string())),
            Err(payload) => {
                let message = format!("panicked: {}", panic_message(payload.as_ref()));
                reporter.report(FaultReport::task(name, message));
            }
        }
    })
}
