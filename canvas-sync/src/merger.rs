//! Inbound merge: store batches onto the editing surface.
//!
//! Every batch is applied through [`EditingSurface::apply`] tagged
//! [`ChangeOrigin::Remote`], so the surface's own change notification is
//! recognized by the loop guard and never flows back out.

use crate::delta::Delta;
use crate::error::SyncError;
use crate::guard::ChangeOrigin;
use crate::store::StoreUpdate;
use crate::surface::EditingSurface;

/// What one inbound batch did to the local document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Records identical to the local version, skipped
    pub unchanged: usize,
    /// This batch completed the initial sync
    pub initial_sync: bool,
}

impl MergeReport {
    pub fn applied(&self) -> usize {
        self.added + self.updated + self.removed
    }
}

#[derive(Debug, Default)]
pub struct InboundMerger {
    synced: bool,
    batches: u64,
}

impl InboundMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one store batch into `surface`.
    ///
    /// Add-vs-update is decided by whether the surface already holds the id.
    /// Removals of ids the surface does not hold are ignored. The first
    /// successful call, even for an empty batch, reports `initial_sync`.
    pub fn apply_remote(
        &mut self,
        surface: &dyn EditingSurface,
        update: StoreUpdate,
    ) -> Result<MergeReport, SyncError> {
        let mut report = MergeReport::default();
        let mut changes = Delta::new();

        for record in update.records {
            match surface.record(&record.id) {
                Some(local) if local == record => report.unchanged += 1,
                Some(_) => {
                    report.updated += 1;
                    changes.updated.insert(record.id.clone(), record);
                }
                None => {
                    report.added += 1;
                    changes.added.insert(record.id.clone(), record);
                }
            }
        }

        for id in update.removed {
            if let Some(local) = surface.record(&id) {
                report.removed += 1;
                changes.removed.insert(id, local);
            }
        }

        if !changes.is_empty() {
            surface.apply(changes, ChangeOrigin::Remote)?;
        }

        self.batches += 1;
        if !self.synced {
            self.synced = true;
            report.initial_sync = true;
            log::info!("Initial sync complete ({} records)", report.added);
        } else if report.applied() > 0 {
            log::debug!(
                "Merged remote batch: +{} ~{} -{} ({} unchanged)",
                report.added,
                report.updated,
                report.removed,
                report.unchanged
            );
        }
        Ok(report)
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Batches applied successfully.
    pub fn batches_applied(&self) -> u64 {
        self.batches
    }
}
