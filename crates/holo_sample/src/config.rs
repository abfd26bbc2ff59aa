//! Sampler configuration.
//!
//! All knobs are plain data with per-field defaults so a partial JSON
//! document (or none at all) yields a usable config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SampleError, SampleResult};

/// Default number of concurrent shard fetchers per batch.
pub const DEFAULT_SAMPLE_CONCURRENCY: i64 = 4;
/// Default backoff budget for shard lookups.
pub const DEFAULT_REGION_LOOKUP_BACKOFF_MS: u64 = 10_000;
/// Default backoff budget for opening and advancing shard iterators.
pub const DEFAULT_SCAN_BACKOFF_MS: u64 = 10_000;

/// Key order in which ranges are visited and rows emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    #[default]
    Forward,
    Reverse,
}

impl ScanDirection {
    pub fn is_reverse(self) -> bool {
        matches!(self, Self::Reverse)
    }
}

/// Tuning knobs for one [`TableSampler`](crate::TableSampler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Session-level concurrency hint. Zero or negative values clamp to one.
    #[serde(default = "default_concurrency")]
    pub concurrency: i64,
    /// Backoff budget for topology lookups, in milliseconds.
    #[serde(default = "default_region_lookup_backoff_ms")]
    pub region_lookup_backoff_ms: u64,
    /// Backoff budget for iterator open/advance, in milliseconds.
    #[serde(default = "default_scan_backoff_ms")]
    pub scan_backoff_ms: u64,
    /// Order in which ranges are visited.
    #[serde(default)]
    pub direction: ScanDirection,
}

fn default_concurrency() -> i64 {
    DEFAULT_SAMPLE_CONCURRENCY
}

fn default_region_lookup_backoff_ms() -> u64 {
    DEFAULT_REGION_LOOKUP_BACKOFF_MS
}

fn default_scan_backoff_ms() -> u64 {
    DEFAULT_SCAN_BACKOFF_MS
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_SAMPLE_CONCURRENCY,
            region_lookup_backoff_ms: DEFAULT_REGION_LOOKUP_BACKOFF_MS,
            scan_backoff_ms: DEFAULT_SCAN_BACKOFF_MS,
            direction: ScanDirection::Forward,
        }
    }
}

impl SamplerConfig {
    pub fn from_json(raw: &str) -> SampleResult<Self> {
        serde_json::from_str(raw).map_err(|err| SampleError::Config(err.to_string()))
    }

    pub fn with_concurrency(mut self, concurrency: i64) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_direction(mut self, direction: ScanDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_scan_backoff_ms(mut self, budget_ms: u64) -> Self {
        self.scan_backoff_ms = budget_ms;
        self
    }

    pub fn with_region_lookup_backoff_ms(mut self, budget_ms: u64) -> Self {
        self.region_lookup_backoff_ms = budget_ms;
        self
    }

    /// Concurrency hint clamped to at least one fetcher.
    pub fn effective_concurrency(&self) -> usize {
        usize::try_from(self.concurrency.max(1)).unwrap_or(usize::MAX)
    }

    pub fn region_lookup_budget(&self) -> Duration {
        Duration::from_millis(self.region_lookup_backoff_ms)
    }

    pub fn scan_budget(&self) -> Duration {
        Duration::from_millis(self.scan_backoff_ms)
    }
}
