//! Counters for transfer operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector for table transfers.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Downloads completed
    pub downloads: AtomicU64,
    /// Uploads completed
    pub uploads: AtomicU64,
    /// Failed transfers
    pub transfers_failed: AtomicU64,
    /// Rows read from the remote
    pub rows_downloaded: AtomicU64,
    /// Rows written to the remote
    pub rows_uploaded: AtomicU64,
    /// Upload chunks sent
    pub chunks: AtomicU64,
    /// Statements sent to the remote
    pub statements: AtomicU64,
    /// Retries after rate limiting
    pub rate_limit_retries: AtomicU64,
    /// Total transfer duration in milliseconds
    pub transfer_duration_ms: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished download.
    pub fn record_download(&self, rows: u64, duration_ms: u64) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
        self.rows_downloaded.fetch_add(rows, Ordering::Relaxed);
        self.transfer_duration_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
    }

    /// Record a finished upload.
    pub fn record_upload(&self, rows: u64, duration_ms: u64) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
        self.rows_uploaded.fetch_add(rows, Ordering::Relaxed);
        self.transfer_duration_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
    }

    /// Record a failed transfer.
    pub fn record_failure(&self) {
        self.transfers_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one upload chunk.
    pub fn record_chunk(&self) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a statement.
    pub fn record_statement(&self) {
        self.statements.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry after rate limiting.
    pub fn record_rate_limit_retry(&self) {
        self.rate_limit_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            downloads: self.downloads.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            rows_downloaded: self.rows_downloaded.load(Ordering::Relaxed),
            rows_uploaded: self.rows_uploaded.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            statements: self.statements.load(Ordering::Relaxed),
            rate_limit_retries: self.rate_limit_retries.load(Ordering::Relaxed),
            transfer_duration_ms: self.transfer_duration_ms.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Downloads completed
    pub downloads: u64,
    /// Uploads completed
    pub uploads: u64,
    /// Failed transfers
    pub transfers_failed: u64,
    /// Rows read from the remote
    pub rows_downloaded: u64,
    /// Rows written to the remote
    pub rows_uploaded: u64,
    /// Upload chunks sent
    pub chunks: u64,
    /// Statements sent to the remote
    pub statements: u64,
    /// Retries after rate limiting
    pub rate_limit_retries: u64,
    /// Total transfer duration in milliseconds
    pub transfer_duration_ms: u64,
}

impl MetricsSnapshot {
    /// Rows moved per second across all transfers.
    pub fn rows_per_second(&self) -> f64 {
        if self.transfer_duration_ms == 0 {
            0.0
        } else {
            ((self.rows_downloaded + self.rows_uploaded) as f64 * 1000.0)
                / self.transfer_duration_ms as f64
        }
    }
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Start a new timer.
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration.
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("{} completed in {}ms", self.label, elapsed);
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_upload(100, 1000);
        metrics.record_download(50, 500);
        metrics.record_chunk();
        metrics.record_chunk();
        metrics.record_statement();
        metrics.record_rate_limit_retry();
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.uploads, 1);
        assert_eq!(snapshot.downloads, 1);
        assert_eq!(snapshot.rows_uploaded, 100);
        assert_eq!(snapshot.rows_downloaded, 50);
        assert_eq!(snapshot.chunks, 2);
        assert_eq!(snapshot.statements, 1);
        assert_eq!(snapshot.rate_limit_retries, 1);
        assert_eq!(snapshot.transfers_failed, 1);
        assert!((snapshot.rows_per_second() - 100.0).abs() < 0.001);
    }

    #[test]
    fn test_empty_rate() {
        assert_eq!(Metrics::new().snapshot().rows_per_second(), 0.0);
    }
}
