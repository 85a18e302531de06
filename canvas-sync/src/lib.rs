//! # canvas-sync — Client-side reconciliation engine for shared canvases
//!
//! Sits between an editing surface (which owns the in-memory records) and a
//! durable document store (which owns persistence and fan-out), and keeps
//! the two in step without feedback loops.
//!
//! ## Architecture
//!
//! ```text
//!  EditingSurface ──notify──► LoopGuard ──local only──► DeltaBuffer
//!        ▲                                                  │
//!        │ apply(.., Remote)                                ▼
//! ┌──────┴────────┐                                DebouncedFlusher
//! │ InboundMerger │                                         │ push_changes
//! └──────▲────────┘                                         ▼
//!        │ on_records          ┌──────────────────────────────────┐
//!        └──────────────────── │ DocumentStore / PresenceStore     │
//!                              └──────▲───────────────────┬────────┘
//!  pointer ──► PresencePublisher ─────┘                   │ on_presence
//!                                                          ▼
//!                    Camera ◄── PresenceSubscriber (stale + self filter)
//! ```
//!
//! ## Modules
//!
//! - [`record`] — Record identity and payload
//! - [`delta`] — Delta and the folding `DeltaBuffer`
//! - [`guard`] — Change origin tagging and the loop guard
//! - [`flusher`] — Debounce state machine (idle / pending / sending)
//! - [`merger`] — Applies store batches to the surface as remote changes
//! - [`presence`] — Presence records, publisher throttle, subscriber filter
//! - [`projection`] — Document ↔ screen camera
//! - [`surface`] — Editing surface contract, in-memory canvas, fault boundary
//! - [`store`] — Store contracts and the in-memory `MemoryStore`
//! - [`session`] — Wires one client together and owns its background tasks
//! - [`fault`] — Last-resort reporting for panics and failed tasks
//! - [`config`] — Tunable windows and intervals
//! - [`error`] — `SyncError`

pub mod config;
pub mod delta;
pub mod error;
pub mod fault;
pub mod flusher;
pub mod guard;
pub mod merger;
pub mod presence;
pub mod projection;
pub mod record;
pub mod session;
pub mod store;
pub mod surface;

// Re-exports for convenience
pub use config::SyncConfig;
pub use delta::{Delta, DeltaBuffer};
pub use error::SyncError;
pub use fault::{install_last_resort_handler, spawn_reported, FaultReport, FaultReporter, FaultSource};
pub use flusher::{DebouncedFlusher, FlushState, FlushStats};
pub use guard::{ChangeNotification, ChangeOrigin, GuardStats, LoopGuard};
pub use merger::{InboundMerger, MergeReport};
pub use presence::{
    CursorColor, CursorView, LastActive, PresencePublisher, PresenceRecord,
    PresenceSubscriber, ProviderTimestamp, PublishStats, RemoteCursor, ResolveMillis, UserProfile,
};
pub use projection::{Camera, Vec2};
pub use record::{Record, RecordId, RecordKind};
pub use session::{CloseReport, SessionDeps, SessionStats, SyncSession, SyncStatus};
pub use store::{
    DocumentStore, MemoryStore, MemoryStoreStats, PresenceCallback, PresenceStore,
    RecordCallback, StoreUpdate, Subscription,
};
pub use surface::{
    BoundaryState, Canvas, ChangeListener, EditingSurface, ListenerId, SurfaceBoundary,
};
