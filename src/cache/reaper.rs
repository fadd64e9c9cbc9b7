//! Background sweep of expired disk-resident entries.
//!
//! Each sweep reads every index record whose expiry has passed, deletes the
//! file and only then removes the record. A crash between the two steps leaves
//! a record without a file, which the next sweep clears without error.
//!
//! A concurrent refetch may re-score a record after the range query. Such a
//! record is skipped before its file is touched, and removal is conditional on
//! the score the sweep saw, so a refreshed file never loses its record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::backend::{BackendError, CacheBackend};
use super::disk::{DiskError, DiskStore};
use super::entry::unix_millis;
use super::store::DISK_INDEX_KEY;

const METRIC_REAPER_DELETED: &str = "edgecache_reaper_deleted_total";

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Index records found past their expiry.
    pub expired: usize,
    pub files_deleted: usize,
    /// Records whose file was already gone.
    pub files_missing: usize,
    pub records_removed: usize,
    /// Records re-scored past the cutoff by a concurrent write and left alone.
    pub refreshed: usize,
    /// Records left for the next sweep, or dropped because they were unusable.
    pub failures: usize,
}

#[derive(Clone)]
pub struct CacheReaper {
    backend: Arc<dyn CacheBackend>,
    disk: DiskStore,
    interval: Duration,
}

impl CacheReaper {
    pub fn new(backend: Arc<dyn CacheBackend>, disk: DiskStore, interval: Duration) -> Self {
        Self {
            backend,
            disk,
            interval,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, BackendError> {
        self.sweep_at(OffsetDateTime::now_utc()).await
    }

    /// Sweep every record that expired at or before `now`.
    ///
    /// Only the index query itself is fatal. Per-record failures are logged
    /// and counted.
    pub async fn sweep_at(&self, now: OffsetDateTime) -> Result<SweepReport, BackendError> {
        let started_at = Instant::now();
        let cutoff = unix_millis(now);
        let expired = self
            .backend
            .sorted_range_up_to(DISK_INDEX_KEY, cutoff)
            .await?;

        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };

        for file_name in &expired {
            match self.backend.sorted_score(DISK_INDEX_KEY, file_name).await {
                Ok(Some(score)) if score <= cutoff => {}
                Ok(_) => {
                    debug!(file_name, "Disk index record refreshed since the sweep began");
                    report.refreshed += 1;
                    continue;
                }
                Err(err) => {
                    warn!(file_name, error = %err, "Failed to re-read disk index record");
                    report.failures += 1;
                    continue;
                }
            }

            match self.disk.delete(file_name).await {
                Ok(true) => report.files_deleted += 1,
                Ok(false) => report.files_missing += 1,
                Err(DiskError::InvalidFileName(_)) => {
                    warn!(file_name, "Dropping disk index record with invalid file name");
                    report.failures += 1;
                    self.remove_record(file_name, cutoff, &mut report).await;
                    continue;
                }
                Err(err) => {
                    warn!(file_name, error = %err, "Failed to delete expired cache file");
                    report.failures += 1;
                    continue;
                }
            }
            if self.remove_record(file_name, cutoff, &mut report).await {
                report.records_removed += 1;
            }
        }

        counter!(METRIC_REAPER_DELETED).increment(report.files_deleted as u64);
        if report.expired > 0 {
            info!(
                expired = report.expired,
                files_deleted = report.files_deleted,
                files_missing = report.files_missing,
                records_removed = report.records_removed,
                refreshed = report.refreshed,
                failures = report.failures,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Cache reaper sweep finished"
            );
        } else {
            debug!("Cache reaper found nothing to sweep");
        }
        Ok(report)
    }

    /// Remove the record unless a concurrent write re-scored it past `cutoff`.
    async fn remove_record(&self, file_name: &str, cutoff: i64, report: &mut SweepReport) -> bool {
        match self
            .backend
            .sorted_remove_if_score_at_most(DISK_INDEX_KEY, file_name, cutoff)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                debug!(file_name, "Disk index record refreshed during the sweep");
                report.refreshed += 1;
                false
            }
            Err(err) => {
                warn!(file_name, error = %err, "Failed to remove disk index record");
                report.failures += 1;
                false
            }
        }
    }

    /// Run sweeps on the configured interval until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(err) = self.sweep().await {
                error!(error = %err, "Cache reaper could not read the disk index");
            }
        }
    }
}
