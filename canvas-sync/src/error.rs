//! Error type shared by every fallible operation in the crate.

/// Sync errors.
///
/// `Store` and `Presence` are transient: the session surfaces them through
/// [`SyncStatus::Error`](crate::session::SyncStatus), never retries the
/// failed payload, and keeps running. Any other error returned by a store
/// also sets `Error` but stops the loop that hit it, which is then reported
/// to the [`FaultReporter`](crate::fault::FaultReporter). `Surface` faults
/// are contained by [`SurfaceBoundary`](crate::surface::SurfaceBoundary).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Outbound push rejected by the document store
    #[error("store rejected changes: {0}")]
    Store(String),
    /// Presence publish rejected by the presence store
    #[error("presence publish failed: {0}")]
    Presence(String),
    /// Editing surface raised an error or panicked
    #[error("editing surface fault: {0}")]
    Surface(String),
    /// Configuration value out of range or unparsable
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Operation attempted on a closed session
    #[error("session closed")]
    Closed,
}

impl SyncError {
    /// Whether the error is a store/presence rejection that the next natural
    /// flush or publish may succeed past.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Store(_) | SyncError::Presence(_))
    }
}
