//! Reclamation sweeper
//!
//! Periodically removes completed reports past retention and active reports
//! past the generation timeout, then deletes their artifact files.

use crate::store::{remove_artifacts, SessionStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Completed reports removed after retention
    pub expired: usize,
    /// Active reports removed after the timeout
    pub timed_out: usize,
    /// Artifact files that could not be deleted
    pub artifact_failures: usize,
}

impl SweepReport {
    /// Total records removed
    #[inline]
    #[must_use]
    pub fn removed(&self) -> usize {
        self.expired + self.timed_out
    }
}

/// Retention and timeout policy over a shared store
#[derive(Debug, Clone)]
pub struct ReclamationSweeper {
    store: Arc<SessionStore>,
    retention: Duration,
    timeout: Duration,
    interval: Duration,
}

impl ReclamationSweeper {
    /// Create new sweeper
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        retention: Duration,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            retention,
            timeout,
            interval,
        }
    }

    /// Sweep against the current time
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    /// Sweep as if the current time were `now`
    ///
    /// Records are removed under the store lock; file cleanup happens after,
    /// one record at a time, so a bad file never blocks the rest.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let expired = self.store.reap_expired(now, self.retention);
        let timed_out = self.store.reap_timed_out(now, self.timeout);

        let mut report = SweepReport {
            expired: expired.len(),
            timed_out: timed_out.len(),
            artifact_failures: 0,
        };
        for record in expired.iter().chain(timed_out.iter()) {
            report.artifact_failures += remove_artifacts(record);
        }

        if report.removed() > 0 || report.artifact_failures > 0 {
            tracing::info!(
                expired = report.expired,
                timed_out = report.timed_out,
                artifact_failures = report.artifact_failures,
                "reclamation sweep finished"
            );
        } else {
            tracing::debug!("reclamation sweep found nothing to remove");
        }
        report
    }

    /// Run [`Self::sweep`] every interval on a background task
    ///
    /// The first sweep happens one interval after start. A zero interval is
    /// raised to one millisecond.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.interval.max(MIN_INTERVAL));
            // First tick completes immediately.
            timer.tick().await;
            tracing::info!(interval_secs = self.interval.as_secs(), "reclamation sweeper started");

            loop {
                timer.tick().await;
                self.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ReportUpdate;
    use crate::types::{Outline, ReportStatus, SectionDescriptor, SectionRecord};
    use std::path::PathBuf;

    const HOUR: Duration = Duration::from_secs(3600);

    fn sweeper(store: &Arc<SessionStore>) -> ReclamationSweeper {
        ReclamationSweeper::new(store.clone(), 24 * HOUR, HOUR / 2, HOUR)
    }

    fn completed(store: &SessionStore, topic: &str) -> crate::types::ReportId {
        let id = store.create(topic, "").unwrap();
        store
            .update(
                id,
                ReportUpdate::status(ReportStatus::GeneratingSections)
                    .with_progress(20)
                    .with_outline(Outline {
                        title: topic.into(),
                        abstract_text: String::new(),
                        sections: vec![SectionDescriptor::new("1", "s", "")],
                    }),
            )
            .unwrap();
        store.add_section(id, "1", SectionRecord::generated("s", "c"));
        store
            .update(id, ReportUpdate::status(ReportStatus::Finalizing))
            .unwrap();
        assert!(store.complete(id));
        id
    }

    #[test]
    fn nothing_to_do_when_fresh() {
        let store = Arc::new(SessionStore::default());
        store.create("a", "").unwrap();
        completed(&store, "b");

        assert_eq!(sweeper(&store).sweep(), SweepReport::default());
        assert_eq!(store.total_count(), 2);
    }

    #[test]
    fn removes_expired_and_timed_out() {
        let store = Arc::new(SessionStore::default());
        let active = store.create("a", "").unwrap();
        let done = completed(&store, "b");

        let report = sweeper(&store).sweep_at(Utc::now() + chrono::Duration::hours(25));
        assert_eq!(report.expired, 1);
        assert_eq!(report.timed_out, 1);
        assert!(store.get(active).is_none());
        assert!(store.get(done).is_none());
    }

    #[test]
    fn deletes_artifact_files_of_reaped_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");
        std::fs::write(&path, "body").unwrap();

        let store = Arc::new(SessionStore::default());
        let done = completed(&store, "b");
        store.attach_artifact(done, "markdown", path.clone()).unwrap();

        let report = sweeper(&store).sweep_at(Utc::now() + chrono::Duration::hours(25));
        assert_eq!(report.expired, 1);
        assert_eq!(report.artifact_failures, 0);
        assert!(!path.exists());
    }

    #[test]
    fn missing_artifact_is_not_a_failure() {
        let store = Arc::new(SessionStore::default());
        let done = completed(&store, "b");
        store
            .attach_artifact(done, "markdown", PathBuf::from("/nonexistent/dossier/report.md"))
            .unwrap();

        let report = sweeper(&store).sweep_at(Utc::now() + chrono::Duration::hours(25));
        assert_eq!(report.expired, 1);
        assert_eq!(report.artifact_failures, 0);
    }

    #[test]
    fn undeletable_artifact_is_counted_and_sweep_continues() {
        let dir = tempfile::tempdir().unwrap();
        let stuck = dir.path().join("stuck.md");
        std::fs::create_dir(&stuck).unwrap();
        let normal = dir.path().join("normal.md");
        std::fs::write(&normal, "body").unwrap();

        let store = Arc::new(SessionStore::default());
        let first = completed(&store, "a");
        let second = completed(&store, "b");
        store.attach_artifact(first, "markdown", stuck.clone()).unwrap();
        store.attach_artifact(second, "markdown", normal.clone()).unwrap();

        let report = sweeper(&store).sweep_at(Utc::now() + chrono::Duration::hours(25));
        assert_eq!(report.expired, 2);
        assert_eq!(report.artifact_failures, 1);
        assert!(store.get(first).is_none());
        assert!(store.get(second).is_none());
        assert!(!normal.exists());
        assert!(stuck.exists());
    }

    #[test]
    fn failed_reports_are_reaped_by_timeout() {
        let store = Arc::new(SessionStore::default());
        let id = store.create("a", "").unwrap();
        store.mark_error(id, "outline parse failed");

        let report = sweeper(&store).sweep_at(Utc::now() + chrono::Duration::minutes(31));
        assert_eq!(report.timed_out, 1);
        assert!(store.get(id).is_none());
    }

    #[tokio::test]
    async fn background_task_sweeps_each_interval() {
        let store = Arc::new(SessionStore::default());
        let sweeper = ReclamationSweeper::new(
            store.clone(),
            Duration::ZERO,
            Duration::from_secs(3600),
            Duration::from_millis(50),
        );
        completed(&store, "b");
        std::thread::sleep(Duration::from_millis(2));

        let handle = sweeper.spawn();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.count_completed(), 0);
        handle.abort();
    }

    #[tokio::test]
    async fn zero_interval_does_not_kill_the_task() {
        let store = Arc::new(SessionStore::default());
        let sweeper =
            ReclamationSweeper::new(store.clone(), Duration::ZERO, HOUR, Duration::ZERO);
        completed(&store, "b");
        std::thread::sleep(Duration::from_millis(2));

        let handle = sweeper.spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        assert_eq!(store.count_completed(), 0);
        handle.abort();
    }
}
