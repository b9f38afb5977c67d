//! CasLifecycleManager: reference replacement and garbage collection.
//!
//! Two jobs live here:
//!
//! 1. **Replace ordering.** Swapping manifest A for manifest B must persist
//!    B's reference set before A's is removed. A crash between the two steps
//!    leaves both sets tracked - safe, just slightly stale - instead of a
//!    window where an on-disk object has no tracked owner.
//!
//! 2. **GC.** One run at a time, process-wide, behind a single-permit
//!    semaphore. Callers that can't get the permit in time get a "skipped"
//!    result instead of an error: GC is idempotent and safe to defer, so
//!    contention is backpressure, not failure. Orphans younger than the
//!    grace period are spared to cover the write-then-track window.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::CasSettings;
use crate::error::{CasError, CasResult};
use crate::hash::ContentHash;
use crate::pool::CasPoolManager;
use crate::refs::CasReferenceTracker;

/// A manifest's identity and reference set, ready for tracking.
#[derive(Debug, Clone)]
pub struct ManifestRefs {
    pub id: String,
    pub version: String,
    pub hashes: BTreeSet<ContentHash>,
}

/// Result of a replace operation.
///
/// `untrack_error` being Some means the new set was tracked but the old
/// record could not be removed; the system is safe but carries a stale
/// record until the next untrack or GC cycle.
#[derive(Debug)]
pub struct ReplaceOutcome {
    pub untracked_old: bool,
    pub untrack_error: Option<CasError>,
}

/// Per-ID outcome list for bulk untracking.
///
/// "Failed" here means at least one ID failed, never "nothing succeeded";
/// callers must inspect `failed` rather than treating the report as a
/// boolean.
#[derive(Debug, Default)]
pub struct BulkUntrackReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, CasError)>,
}

impl BulkUntrackReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    /// First per-ID error, for callers that surface a single summary.
    pub fn first_error(&self) -> Option<&CasError> {
        self.failed.first().map(|(_, e)| e)
    }
}

/// Counters from a completed GC run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub objects_scanned: u64,
    pub objects_referenced: u64,
    pub objects_deleted: u64,
    pub objects_in_grace: u64,
    pub bytes_freed: u64,
}

/// Outcome of a GC request.
#[derive(Debug)]
pub enum GcOutcome {
    /// The exclusivity permit was not acquired within the timeout.
    Skipped,
    /// GC ran to completion.
    Completed(GcReport),
}

impl GcOutcome {
    pub fn report(&self) -> Option<&GcReport> {
        match self {
            GcOutcome::Skipped => None,
            GcOutcome::Completed(report) => Some(report),
        }
    }
}

/// Read-only diagnostic snapshot of the reference graph and object store.
#[derive(Debug, Clone)]
pub struct ReferenceAudit {
    pub manifest_ids: Vec<String>,
    pub workspace_ids: Vec<String>,
    pub referenced_hash_count: usize,
    pub object_count: u64,
    pub orphan_count: u64,
}

/// Orchestrates reference replacement and GC over the pools and tracker.
pub struct CasLifecycleManager {
    pools: Arc<CasPoolManager>,
    tracker: Arc<CasReferenceTracker>,
    settings: CasSettings,
    gc_permit: Semaphore,
}

impl CasLifecycleManager {
    pub fn new(
        pools: Arc<CasPoolManager>,
        tracker: Arc<CasReferenceTracker>,
        settings: CasSettings,
    ) -> Self {
        Self {
            pools,
            tracker,
            settings,
            gc_permit: Semaphore::new(1),
        }
    }

    /// The tracker this manager mutates.
    pub fn tracker(&self) -> &Arc<CasReferenceTracker> {
        &self.tracker
    }

    /// Replace `old_id`'s reference set with `new`'s.
    ///
    /// The new set is durably written first; only then is the old record
    /// removed. If tracking the new set fails, the old set is untouched and
    /// the error propagates. If untracking the old set fails afterwards,
    /// the call still succeeds with the error carried in the outcome: both
    /// records exist, nothing referenced is at risk.
    #[instrument(skip(self, new), fields(new_id = %new.id, new_version = %new.version))]
    pub async fn replace_manifest_references(
        &self,
        old_id: Option<&str>,
        new: &ManifestRefs,
    ) -> CasResult<ReplaceOutcome> {
        self.tracker
            .track_manifest_references(&new.id, new.hashes.clone(), &new.version)
            .await?;

        let old_id = match old_id {
            Some(id) if id != new.id => id,
            _ => {
                // Same ID (or none): the track above already overwrote it.
                return Ok(ReplaceOutcome {
                    untracked_old: old_id.is_some(),
                    untrack_error: None,
                });
            }
        };

        match self.tracker.untrack_manifest(old_id).await {
            Ok(()) => Ok(ReplaceOutcome {
                untracked_old: true,
                untrack_error: None,
            }),
            Err(e) => {
                warn!(old_id, error = %e, "new references tracked but old record not removed");
                Ok(ReplaceOutcome {
                    untracked_old: false,
                    untrack_error: Some(e),
                })
            }
        }
    }

    /// Untrack many manifests, independently. One ID failing does not stop
    /// the rest; the report carries every per-ID outcome.
    #[instrument(skip(self, ids, cancel), fields(count = ids.len()))]
    pub async fn untrack_manifests_bulk(
        &self,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> BulkUntrackReport {
        let mut report = BulkUntrackReport::default();
        for id in ids {
            if cancel.is_cancelled() {
                report.failed.push((id.clone(), CasError::Cancelled));
                continue;
            }
            match self.tracker.untrack_manifest(id).await {
                Ok(()) => report.succeeded.push(id.clone()),
                Err(e) => {
                    warn!(id, error = %e, "bulk untrack: id failed");
                    report.failed.push((id.clone(), e));
                }
            }
        }
        report
    }

    /// Run garbage collection across every pool.
    ///
    /// `force` waits for the GC permit indefinitely; otherwise the wait is
    /// bounded by the configured lock timeout and a miss returns
    /// [`GcOutcome::Skipped`]. The algorithm: enumerate all objects, compute
    /// the live set from the tracker, delete orphans past the grace period.
    /// Individual delete failures are logged and skipped; the run continues.
    #[instrument(skip(self, cancel), fields(force))]
    pub async fn run_garbage_collection(
        &self,
        force: bool,
        cancel: &CancellationToken,
    ) -> CasResult<GcOutcome> {
        let _permit = if force {
            self.gc_permit
                .acquire()
                .await
                .map_err(|_| CasError::LockTimeout)?
        } else {
            match timeout(self.settings.gc_lock_timeout(), self.gc_permit.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(CasError::LockTimeout),
                Err(_) => {
                    info!("gc skipped: permit not acquired within timeout");
                    return Ok(GcOutcome::Skipped);
                }
            }
        };

        // Enumerate first, snapshot the live set second. References
        // registered while the scan runs (a workspace tracking hashes of
        // objects that already exist and are past the grace period) are
        // then still visible to the delete pass.
        let mut scans = Vec::new();
        for pool in self.pools.all_pools().await? {
            let entries = pool.enumerate_objects().await?;
            scans.push((pool, entries));
        }

        let live = self.tracker.all_referenced_hashes(cancel).await?;
        let grace = self.settings.gc_grace_period();
        let now = SystemTime::now();
        let mut report = GcReport::default();

        for (pool, entries) in scans {
            for entry in entries {
                if cancel.is_cancelled() {
                    return Err(CasError::Cancelled);
                }
                report.objects_scanned += 1;

                if live.contains(&entry.hash) {
                    report.objects_referenced += 1;
                    continue;
                }

                // Orphan. Spare it if it was written more recently than the
                // grace period: its reference set may not be persisted yet.
                let age = now
                    .duration_since(entry.modified)
                    .unwrap_or_default();
                if age < grace {
                    report.objects_in_grace += 1;
                    continue;
                }

                match pool.delete(&entry.hash).await {
                    Ok(true) => {
                        report.objects_deleted += 1;
                        report.bytes_freed += entry.size;
                        debug!(hash = %entry.hash, size = entry.size, "gc deleted orphan");
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(hash = %entry.hash, error = %e, "gc: delete failed, continuing");
                    }
                }
            }
        }

        info!(
            scanned = report.objects_scanned,
            referenced = report.objects_referenced,
            deleted = report.objects_deleted,
            bytes_freed = report.bytes_freed,
            "gc completed"
        );
        Ok(GcOutcome::Completed(report))
    }

    /// Operability snapshot: tracked IDs, reference counts, orphan counts.
    pub async fn get_reference_audit(
        &self,
        cancel: &CancellationToken,
    ) -> CasResult<ReferenceAudit> {
        let manifest_ids = self.tracker.tracked_manifest_ids().await?;
        let workspace_ids = self.tracker.tracked_workspace_ids().await?;
        let referenced = self.tracker.all_referenced_hashes(cancel).await?;

        let mut object_count = 0u64;
        let mut orphan_count = 0u64;
        for pool in self.pools.all_pools().await? {
            for entry in pool.enumerate_objects().await? {
                object_count += 1;
                if !referenced.contains(&entry.hash) {
                    orphan_count += 1;
                }
            }
        }

        Ok(ReferenceAudit {
            manifest_ids,
            workspace_ids,
            referenced_hash_count: referenced.len(),
            object_count,
            orphan_count,
        })
    }
}
