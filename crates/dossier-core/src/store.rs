//! Session store for report records
//!
//! Every record lives in exactly one of two pools:
//! - `active`: being generated, or failed and awaiting the sweeper
//! - `completed`: promoted by [`SessionStore::complete`]
//!
//! Both pools sit behind a single lock so a move between them is atomic
//! with respect to every other operation. All operations are short,
//! in-memory and never held across an `.await`.

use crate::error::ReportError;
use crate::lifecycle::validate_transition;
use crate::summary::compute_summary;
use crate::types::{Outline, ReportId, ReportRecord, ReportStatus, SectionRecord};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Default)]
struct Pools {
    active: HashMap<ReportId, ReportRecord>,
    completed: HashMap<ReportId, ReportRecord>,
}

impl Pools {
    fn find(&self, id: &ReportId) -> Option<&ReportRecord> {
        self.active.get(id).or_else(|| self.completed.get(id))
    }

    fn find_mut(&mut self, id: &ReportId) -> Option<&mut ReportRecord> {
        match self.active.get_mut(id) {
            Some(record) => Some(record),
            None => self.completed.get_mut(id),
        }
    }

    fn contains(&self, id: &ReportId) -> bool {
        self.active.contains_key(id) || self.completed.contains_key(id)
    }
}

/// Partial update applied to an active record
#[derive(Debug, Clone, Default)]
pub struct ReportUpdate {
    /// New status
    pub status: Option<ReportStatus>,
    /// New progress; lower values than the current one are ignored
    pub progress: Option<u8>,
    /// Outline to attach
    pub outline: Option<Outline>,
    /// Error message to record
    pub error: Option<String>,
}

impl ReportUpdate {
    /// Empty update
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update that sets a status
    #[inline]
    #[must_use]
    pub fn status(status: ReportStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// With progress
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    /// With outline
    #[inline]
    #[must_use]
    pub fn with_outline(mut self, outline: Outline) -> Self {
        self.outline = Some(outline);
        self
    }

    /// With error message
    #[inline]
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Aggregate counters over both pools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStatistics {
    /// Records in either pool
    pub total_reports: usize,
    /// Records in the completed pool
    pub completed_reports: usize,
    /// Records in the active pool
    pub active_reports: usize,
    /// Downloads across completed reports
    pub total_downloads: u64,
    /// Mean generation time of completed reports, 0 when none
    pub average_generation_secs: f64,
    /// Configured capacity
    pub max_active_reports: usize,
}

/// Serializable copy of both pools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// When the snapshot was taken
    pub exported_at: DateTime<Utc>,
    /// Active pool contents
    pub active: Vec<ReportRecord>,
    /// Completed pool contents
    pub completed: Vec<ReportRecord>,
    /// Counters at export time
    pub statistics: StoreStatistics,
}

/// Result of merging a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Records added
    pub imported: usize,
    /// Records rejected (duplicate id, wrong pool, no capacity)
    pub skipped: usize,
}

/// In-memory store of all report records
#[derive(Debug)]
pub struct SessionStore {
    max_active: usize,
    pools: RwLock<Pools>,
}

impl SessionStore {
    /// Create new store with an active-pool capacity
    #[inline]
    #[must_use]
    pub fn new(max_active: usize) -> Self {
        Self {
            max_active,
            pools: RwLock::new(Pools::default()),
        }
    }

    /// Active-pool capacity
    #[inline]
    #[must_use]
    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Insert a new record in `generating_outline` with progress 0
    ///
    /// # Errors
    /// - `ReportError::CapacityExceeded` if the active pool is full
    pub fn create(
        &self,
        topic: impl Into<String>,
        requirements: impl Into<String>,
    ) -> Result<ReportId, ReportError> {
        let record = ReportRecord::new(topic, requirements);
        let id = record.id;

        let mut pools = self.pools.write();
        if pools.active.len() >= self.max_active {
            return Err(ReportError::CapacityExceeded {
                max: self.max_active,
            });
        }
        tracing::info!(report_id = %id, topic = %record.topic, "report session created");
        pools.active.insert(id, record);

        Ok(id)
    }

    /// Look up a record, active pool first
    #[must_use]
    pub fn get(&self, id: ReportId) -> Option<ReportRecord> {
        self.pools.read().find(&id).cloned()
    }

    /// Run `f` against a record without cloning it
    pub fn inspect<R>(&self, id: ReportId, f: impl FnOnce(&ReportRecord) -> R) -> Option<R> {
        self.pools.read().find(&id).map(f)
    }

    /// Check if the record is in the active pool
    #[inline]
    #[must_use]
    pub fn is_active(&self, id: ReportId) -> bool {
        self.pools.read().active.contains_key(&id)
    }

    /// Apply a partial update to an active record
    ///
    /// Returns `Ok(false)` when the id is not active: late updates to a
    /// finished or removed report are ignored.
    ///
    /// # Errors
    /// - `ReportError::InvalidTransition` if the status change is not allowed,
    ///   or targets `completed` (only [`Self::complete`] promotes)
    pub fn update(&self, id: ReportId, update: ReportUpdate) -> Result<bool, ReportError> {
        let mut pools = self.pools.write();
        let Some(record) = pools.active.get_mut(&id) else {
            tracing::debug!(report_id = %id, "update for inactive report ignored");
            return Ok(false);
        };

        if let Some(status) = update.status {
            if status == ReportStatus::Completed {
                return Err(ReportError::InvalidTransition {
                    from: record.status,
                    to: status,
                });
            }
            validate_transition(record.status, status)?;
            record.status = status;
        }

        if let Some(progress) = update.progress {
            let progress = progress.min(100);
            if progress < record.progress {
                tracing::debug!(
                    report_id = %id,
                    current = record.progress,
                    requested = progress,
                    "progress regression ignored"
                );
            } else {
                record.progress = progress;
            }
        }

        if let Some(outline) = update.outline {
            record.outline = Some(outline);
        }
        if let Some(error) = update.error {
            record.error = Some(error);
        }

        tracing::debug!(
            report_id = %id,
            status = %record.status,
            progress = record.progress,
            "report progress updated"
        );
        Ok(true)
    }

    /// Record a section result on an active, non-terminal record
    pub fn add_section(
        &self,
        id: ReportId,
        section_id: impl Into<String>,
        section: SectionRecord,
    ) -> bool {
        let mut pools = self.pools.write();
        let Some(record) = pools.active.get_mut(&id) else {
            return false;
        };
        if record.status.is_terminal() {
            return false;
        }

        let section_id = section_id.into();
        tracing::debug!(
            report_id = %id,
            section = %section_id,
            failed = section.failed,
            "section recorded"
        );
        record.sections.insert(section_id, section);
        true
    }

    /// Promote a `finalizing` record to the completed pool
    ///
    /// Stamps `completed_at`, sets progress 100 and caches the summary.
    /// Returns whether the move happened; `false` when the id is no longer
    /// active (e.g. reaped by the sweeper) or not yet finalizing.
    pub fn complete(&self, id: ReportId) -> bool {
        let mut pools = self.pools.write();
        let Some(current) = pools.active.get(&id).map(|r| r.status) else {
            return false;
        };
        if let Err(e) = validate_transition(current, ReportStatus::Completed) {
            tracing::warn!(report_id = %id, error = %e, "completion refused");
            return false;
        }
        let Some(mut record) = pools.active.remove(&id) else {
            return false;
        };

        record.status = ReportStatus::Completed;
        record.completed_at = Some(Utc::now());
        record.progress = 100;
        record.summary = Some(compute_summary(&record));

        tracing::info!(report_id = %id, topic = %record.topic, "report completed");
        pools.completed.insert(id, record);
        true
    }

    /// Move an active, non-terminal record to `error`; it stays active
    pub fn mark_error(&self, id: ReportId, message: impl Into<String>) -> bool {
        let mut pools = self.pools.write();
        let Some(record) = pools.active.get_mut(&id) else {
            return false;
        };
        if validate_transition(record.status, ReportStatus::Error).is_err() {
            return false;
        }

        let message = message.into();
        tracing::error!(report_id = %id, error = %message, "report generation failed");
        record.status = ReportStatus::Error;
        record.error = Some(message);
        true
    }

    /// Remove a record from whichever pool holds it, then its artifact files
    pub fn delete(&self, id: ReportId) -> bool {
        let removed = {
            let mut pools = self.pools.write();
            pools
                .active
                .remove(&id)
                .or_else(|| pools.completed.remove(&id))
        };

        match removed {
            Some(record) => {
                remove_artifacts(&record);
                tracing::info!(report_id = %id, "report deleted");
                true
            }
            None => false,
        }
    }

    /// Bump the download counter; returns the new count
    pub fn increment_downloads(&self, id: ReportId) -> Option<u64> {
        let mut pools = self.pools.write();
        let record = pools.find_mut(&id)?;
        record.download_count += 1;
        tracing::info!(report_id = %id, downloads = record.download_count, "download count updated");
        Some(record.download_count)
    }

    /// Register a rendered artifact file under `format`
    ///
    /// Returns the path previously registered for that format, if any.
    ///
    /// # Errors
    /// - `ReportError::NotFound` if the record no longer exists
    pub fn attach_artifact(
        &self,
        id: ReportId,
        format: impl Into<String>,
        path: PathBuf,
    ) -> Result<Option<PathBuf>, ReportError> {
        let mut pools = self.pools.write();
        let record = pools.find_mut(&id).ok_or(ReportError::NotFound(id))?;
        Ok(record.artifacts.insert(format.into(), path))
    }

    /// Copies of every record in both pools
    #[must_use]
    pub fn list_all(&self) -> Vec<ReportRecord> {
        let pools = self.pools.read();
        pools
            .active
            .values()
            .chain(pools.completed.values())
            .cloned()
            .collect()
    }

    /// Size of the active pool
    #[inline]
    #[must_use]
    pub fn count_active(&self) -> usize {
        self.pools.read().active.len()
    }

    /// Size of the completed pool
    #[inline]
    #[must_use]
    pub fn count_completed(&self) -> usize {
        self.pools.read().completed.len()
    }

    /// Size of both pools
    #[inline]
    #[must_use]
    pub fn total_count(&self) -> usize {
        let pools = self.pools.read();
        pools.active.len() + pools.completed.len()
    }

    /// Aggregate counters
    #[must_use]
    pub fn statistics(&self) -> StoreStatistics {
        let pools = self.pools.read();
        Self::statistics_of(&pools, self.max_active)
    }

    #[allow(clippy::cast_precision_loss)]
    fn statistics_of(pools: &Pools, max_active: usize) -> StoreStatistics {
        let total_downloads = pools.completed.values().map(|r| r.download_count).sum();
        let durations: Vec<f64> = pools
            .completed
            .values()
            .filter_map(|r| r.summary.as_ref()?.generation_duration_secs)
            .collect();
        let average_generation_secs = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        StoreStatistics {
            total_reports: pools.active.len() + pools.completed.len(),
            completed_reports: pools.completed.len(),
            active_reports: pools.active.len(),
            total_downloads,
            average_generation_secs,
            max_active_reports: max_active,
        }
    }

    /// Remove active records created more than `timeout` before `now`
    ///
    /// Each reaped record is marked `error` with the
    /// [`ReportError::GenerationTimedOut`] message and
    /// removed under the same lock acquisition, so a racing
    /// [`Self::complete`] either wins outright or finds nothing to move.
    /// Artifact files are left to the caller.
    pub fn reap_timed_out(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<ReportRecord> {
        let mut pools = self.pools.write();
        let expired: Vec<ReportId> = pools
            .active
            .values()
            .filter(|r| older_than(now, r.created_at, timeout))
            .map(|r| r.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| pools.active.remove(&id))
            .map(|mut record| {
                if !record.status.is_terminal() {
                    record.status = ReportStatus::Error;
                    record.error = Some(ReportError::GenerationTimedOut.to_string());
                }
                tracing::warn!(report_id = %record.id, "active report timed out");
                record
            })
            .collect()
    }

    /// Remove completed records whose `completed_at` is more than
    /// `retention` before `now`. Artifact files are left to the caller.
    pub fn reap_expired(&self, now: DateTime<Utc>, retention: Duration) -> Vec<ReportRecord> {
        let mut pools = self.pools.write();
        let expired: Vec<ReportId> = pools
            .completed
            .values()
            .filter(|r| r.completed_at.is_some_and(|at| older_than(now, at, retention)))
            .map(|r| r.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| pools.completed.remove(&id))
            .collect()
    }

    /// Copy both pools for backup or migration
    #[must_use]
    pub fn export_snapshot(&self) -> StoreSnapshot {
        let pools = self.pools.read();
        StoreSnapshot {
            exported_at: Utc::now(),
            active: pools.active.values().cloned().collect(),
            completed: pools.completed.values().cloned().collect(),
            statistics: Self::statistics_of(&pools, self.max_active),
        }
    }

    /// Merge a snapshot, keeping every id in exactly one pool
    ///
    /// Skips ids already present, completed-pool records that are not
    /// `completed`, active-pool records that are, and active records beyond
    /// capacity.
    pub fn import_snapshot(&self, snapshot: StoreSnapshot) -> ImportSummary {
        let mut summary = ImportSummary::default();
        let mut pools = self.pools.write();

        for record in snapshot.completed {
            if pools.contains(&record.id)
                || record.status != ReportStatus::Completed
                || record.completed_at.is_none()
            {
                summary.skipped += 1;
                continue;
            }
            pools.completed.insert(record.id, record);
            summary.imported += 1;
        }

        for record in snapshot.active {
            if pools.contains(&record.id)
                || record.status == ReportStatus::Completed
                || pools.active.len() >= self.max_active
            {
                summary.skipped += 1;
                continue;
            }
            pools.active.insert(record.id, record);
            summary.imported += 1;
        }

        tracing::info!(
            imported = summary.imported,
            skipped = summary.skipped,
            "report snapshot imported"
        );
        summary
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(10)
    }
}

fn older_than(now: DateTime<Utc>, then: DateTime<Utc>, limit: Duration) -> bool {
    now.signed_duration_since(then)
        .to_std()
        .is_ok_and(|age| age > limit)
}

/// Delete the artifact files a record references
///
/// Missing files are fine. Other failures are logged and counted, never
/// propagated. Returns the number of files that could not be removed.
pub fn remove_artifacts(record: &ReportRecord) -> usize {
    let mut failures = 0;
    for (format, path) in &record.artifacts {
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!(report_id = %record.id, format = %format, path = %path.display(), "artifact removed");
                remove_report_dir(record.id, path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                remove_report_dir(record.id, path);
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    report_id = %record.id,
                    path = %path.display(),
                    error = %e,
                    "failed to remove artifact"
                );
            }
        }
    }
    failures
}

// Artifacts live in a per-report directory named by id; drop it once empty.
fn remove_report_dir(id: ReportId, file: &Path) {
    let Some(dir) = file.parent() else {
        return;
    };
    if dir.file_name().and_then(|n| n.to_str()) == Some(id.to_string().as_str()) {
        let _ = std::fs::remove_dir(dir);
    }
}
