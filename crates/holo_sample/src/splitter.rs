//! Shard-aligned key ranges for a table.

use std::sync::Arc;
use std::time::Duration;

use holo_kv::range::KeyRange;
use holo_kv::{tablecodec, Store};
use tracing::{debug, warn};

use crate::backoff::Backoffer;
use crate::config::ScanDirection;
use crate::error::{SampleError, SampleResult};
use crate::metrics::SampleMetrics;

/// Cuts table intervals at shard boundaries.
pub struct RangeSplitter {
    store: Arc<dyn Store>,
    lookup_budget: Duration,
    metrics: Arc<SampleMetrics>,
}

impl RangeSplitter {
    pub fn new(store: Arc<dyn Store>, lookup_budget: Duration, metrics: Arc<SampleMetrics>) -> Self {
        Self {
            store,
            lookup_budget,
            metrics,
        }
    }

    /// One range per (physical id, shard) pair, sorted by start key in
    /// `direction`.
    pub async fn split(
        &self,
        physical_ids: &[u64],
        direction: ScanDirection,
    ) -> SampleResult<Vec<KeyRange>> {
        let mut ranges = Vec::new();
        for &physical_id in physical_ids {
            let interval = tablecodec::table_range(physical_id);
            if interval.is_empty() {
                continue;
            }
            if !self.store.is_sharded() {
                ranges.push(interval);
                continue;
            }

            let before = ranges.len();
            for shard in self.lookup(&interval).await? {
                if let Some(clipped) = shard.intersect(&interval) {
                    ranges.push(clipped);
                }
            }
            if ranges.len() == before {
                return Err(SampleError::TopologyEmpty {
                    range: interval.to_string(),
                });
            }
        }

        ranges.sort_by(|left, right| left.start_key.cmp(&right.start_key));
        if direction.is_reverse() {
            ranges.reverse();
        }
        debug!(
            physical_ids = ?physical_ids,
            ranges = ranges.len(),
            reverse = direction.is_reverse(),
            "split table into shard ranges"
        );
        Ok(ranges)
    }

    async fn lookup(&self, interval: &KeyRange) -> SampleResult<Vec<KeyRange>> {
        let mut backoff = Backoffer::new(self.lookup_budget);
        loop {
            match self
                .store
                .shards_overlapping(&interval.start_key, &interval.end_key)
                .await
            {
                Ok(shards) => {
                    self.metrics.record_retries(backoff.attempts());
                    return Ok(shards);
                }
                Err(err) if err.is_retryable() => {
                    warn!(range = %interval, error = %err, "shard lookup failed");
                    if !backoff.wait("shard lookup").await {
                        self.metrics.record_retries(backoff.attempts());
                        return Err(SampleError::TopologyUnavailable(format!(
                            "{err} (gave up after {}ms)",
                            backoff.budget_ms()
                        )));
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
