// Packaging metrics module
//
// Lightweight counters for what each packaging run actually did

use crate::services::{ExclusionReport, ReplicationOutcome};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Packaging metrics shared by every run of one packager
///
/// Uses atomic operations so replication tasks can record without locks.
/// A summary is logged after each run.
#[derive(Debug)]
pub struct Metrics {
    pub files_copied: AtomicUsize,

    /// Files skipped because of per-file I/O errors
    pub files_skipped: AtomicUsize,

    pub bytes_copied: AtomicU64,

    pub exclusions_removed: AtomicUsize,

    /// Excluded paths that were not present in the replicated data
    pub exclusions_missing: AtomicUsize,

    pub archive_entries: AtomicUsize,
    pub archive_bytes: AtomicU64,

    pub runs_succeeded: AtomicUsize,
    pub runs_failed: AtomicUsize,

    /// Failed runs that were cancelled on request (also counted in `runs_failed`)
    pub runs_cancelled: AtomicUsize,

    /// Total wall time spent in runs, in milliseconds
    pub total_run_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            files_copied: AtomicUsize::new(0),
            files_skipped: AtomicUsize::new(0),
            bytes_copied: AtomicU64::new(0),
            exclusions_removed: AtomicUsize::new(0),
            exclusions_missing: AtomicUsize::new(0),
            archive_entries: AtomicUsize::new(0),
            archive_bytes: AtomicU64::new(0),
            runs_succeeded: AtomicUsize::new(0),
            runs_failed: AtomicUsize::new(0),
            runs_cancelled: AtomicUsize::new(0),
            total_run_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_replication(&self, outcome: &ReplicationOutcome) {
        self.files_copied
            .fetch_add(outcome.files_copied, Ordering::Relaxed);
        self.files_skipped
            .fetch_add(outcome.skipped.len(), Ordering::Relaxed);
        self.bytes_copied
            .fetch_add(outcome.bytes_copied, Ordering::Relaxed);
    }

    pub fn record_exclusions(&self, report: &ExclusionReport) {
        self.exclusions_removed
            .fetch_add(report.removed(), Ordering::Relaxed);
        self.exclusions_missing
            .fetch_add(report.not_found(), Ordering::Relaxed);
    }

    pub fn record_archive(&self, entries: usize, bytes: u64) {
        self.archive_entries.fetch_add(entries, Ordering::Relaxed);
        self.archive_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_run(&self, success: bool, duration: Duration) {
        if success {
            self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_run_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average run time in milliseconds across finished runs
    pub fn avg_run_time_ms(&self) -> f64 {
        let total = self.total_run_time_ms.load(Ordering::Relaxed);
        let runs = self.runs_succeeded.load(Ordering::Relaxed)
            + self.runs_failed.load(Ordering::Relaxed);
        if runs > 0 {
            total as f64 / runs as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Packaging Metrics Summary ===");
        tracing::info!(
            "Runs: {} succeeded, {} failed, {} cancelled (avg {:.0}ms)",
            self.runs_succeeded.load(Ordering::Relaxed),
            self.runs_failed.load(Ordering::Relaxed),
            self.runs_cancelled.load(Ordering::Relaxed),
            self.avg_run_time_ms()
        );
        tracing::info!(
            "Files: {} copied ({} bytes), {} skipped",
            self.files_copied.load(Ordering::Relaxed),
            self.bytes_copied.load(Ordering::Relaxed),
            self.files_skipped.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Exclusions: {} removed, {} not found",
            self.exclusions_removed.load(Ordering::Relaxed),
            self.exclusions_missing.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Archive: {} entries, {} bytes",
            self.archive_entries.load(Ordering::Relaxed),
            self.archive_bytes.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::SkippedFile;
    use camino::Utf8PathBuf;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.files_copied.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.runs_failed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_replication() {
        let metrics = Metrics::new();
        let outcome = ReplicationOutcome {
            label: "Assets".to_string(),
            files_total: 3,
            files_copied: 2,
            bytes_copied: 512,
            skipped: vec![SkippedFile {
                path: Utf8PathBuf::from("Assets/locked.bin"),
                reason: "locked".to_string(),
            }],
        };

        metrics.record_replication(&outcome);
        metrics.record_replication(&outcome);

        assert_eq!(metrics.files_copied.load(Ordering::Relaxed), 4);
        assert_eq!(metrics.files_skipped.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.bytes_copied.load(Ordering::Relaxed), 1024);
    }

    #[test]
    fn test_record_run_time() {
        let metrics = Metrics::new();

        metrics.record_run(true, Duration::from_millis(100));
        metrics.record_run(false, Duration::from_millis(300));

        assert_eq!(metrics.runs_succeeded.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.runs_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.avg_run_time_ms(), 200.0);
    }

    #[test]
    fn test_cancelled_counted_separately() {
        let metrics = Metrics::new();
        metrics.record_run(false, Duration::from_millis(10));
        metrics.record_cancelled();

        assert_eq!(metrics.runs_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.runs_cancelled.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_avg_run_time_no_runs() {
        let metrics = Metrics::new();
        assert_eq!(metrics.avg_run_time_ms(), 0.0);
    }

    #[test]
    fn test_record_archive() {
        let metrics = Metrics::new();
        metrics.record_archive(5, 2048);
        assert_eq!(metrics.archive_entries.load(Ordering::Relaxed), 5);
        assert_eq!(metrics.archive_bytes.load(Ordering::Relaxed), 2048);
    }
}
