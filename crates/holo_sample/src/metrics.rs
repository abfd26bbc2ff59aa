//! In-process counters for sampler activity.
//!
//! Counters are lock-free so fetcher tasks can bump them on the scan path.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Sampler activity counters, shared by the sampler and its fetchers.
#[derive(Debug, Default)]
pub struct SampleMetrics {
    /// Number of batches dispatched to fetchers.
    batches: AtomicU64,
    /// Largest fetcher count used by a single batch.
    peak_workers: AtomicU64,
    /// Number of ranges a fetcher finished scanning.
    ranges_scanned: AtomicU64,
    /// Ranges that held no record key.
    empty_ranges: AtomicU64,
    /// Rows delivered by successful `next` calls.
    rows_emitted: AtomicU64,
    /// Fetchers that stopped on a storage error.
    fetcher_errors: AtomicU64,
    /// Backoff retries on topology lookups and iterators.
    retries: AtomicU64,
}

/// Immutable copy of [`SampleMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleMetricsSnapshot {
    /// Batches dispatched to fetchers.
    pub batches: u64,
    /// Largest fetcher count of a single batch.
    pub peak_workers: u64,
    /// Ranges a fetcher finished scanning.
    pub ranges_scanned: u64,
    /// Scanned ranges without a record key.
    pub empty_ranges: u64,
    /// Rows delivered by successful `next` calls.
    pub rows_emitted: u64,
    /// Fetchers stopped by a storage error.
    pub fetcher_errors: u64,
    /// Backoff retries across lookups and iterators.
    pub retries: u64,
}

impl SampleMetrics {
    /// Counts one dispatched batch of `workers` fetchers.
    pub fn record_batch(&self, workers: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.peak_workers
            .fetch_max(workers as u64, Ordering::Relaxed);
    }

    /// Counts one scanned range and whether it held a record.
    pub fn record_range(&self, had_record: bool) {
        self.ranges_scanned.fetch_add(1, Ordering::Relaxed);
        if !had_record {
            self.empty_ranges.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counts rows handed to a caller by a completed `next`.
    pub fn record_rows(&self, rows: usize) {
        self.rows_emitted.fetch_add(rows as u64, Ordering::Relaxed);
    }

    /// Counts a fetcher that stopped on a storage error.
    pub fn record_fetcher_error(&self) {
        self.fetcher_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds backoff retries; zero is ignored.
    pub fn record_retries(&self, retries: u32) {
        if retries > 0 {
            self.retries.fetch_add(u64::from(retries), Ordering::Relaxed);
        }
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> SampleMetricsSnapshot {
        SampleMetricsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            peak_workers: self.peak_workers.load(Ordering::Relaxed),
            ranges_scanned: self.ranges_scanned.load(Ordering::Relaxed),
            empty_ranges: self.empty_ranges.load(Ordering::Relaxed),
            rows_emitted: self.rows_emitted.load(Ordering::Relaxed),
            fetcher_errors: self.fetcher_errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}
