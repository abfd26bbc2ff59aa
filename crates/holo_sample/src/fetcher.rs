//! Worker that samples every `workers`-th range of a batch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use holo_kv::range::KeyRange;
use holo_kv::tablecodec::Handle;
use holo_kv::Snapshot;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{SampleError, SampleResult};
use crate::handoff::HandoffSender;
use crate::iterator::ShardIterator;
use crate::metrics::SampleMetrics;

/// First record found in a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub handle: Handle,
    pub value: Vec<u8>,
}

/// Error recorded by a fetcher before it closes its channel.
#[derive(Debug, Clone, Default)]
pub(crate) struct ErrorSlot(Arc<Mutex<Option<SampleError>>>);

impl ErrorSlot {
    pub(crate) fn set(&self, err: SampleError) {
        let mut slot = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.get_or_insert(err);
    }

    pub(crate) fn get(&self) -> Option<SampleError> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Count of fetcher tasks that have not finished yet.
#[derive(Debug, Default)]
pub(crate) struct LiveFetchers {
    count: AtomicUsize,
    idle: Notify,
}

impl LiveFetchers {
    pub(crate) fn enter(self: &Arc<Self>) -> LiveGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        LiveGuard(Arc::clone(self))
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_idle(&self) {
        while self.count() > 0 {
            self.idle.notified().await;
        }
    }
}

pub(crate) struct LiveGuard(Arc<LiveFetchers>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_one();
        }
    }
}

pub(crate) struct ShardFetcher {
    pub(crate) worker_id: usize,
    pub(crate) workers: usize,
    pub(crate) ranges: Arc<[KeyRange]>,
    pub(crate) snapshot: Arc<dyn Snapshot>,
    pub(crate) scan_budget: Duration,
    pub(crate) tx: HandoffSender<Option<RawRecord>>,
    pub(crate) error: ErrorSlot,
    pub(crate) cancel: CancellationToken,
    pub(crate) metrics: Arc<SampleMetrics>,
    pub(crate) _live: LiveGuard,
}

impl ShardFetcher {
    /// Sends one message per assigned range, in range order. Stops at the
    /// first error, after recording it. Dropping `self` closes the channel.
    pub(crate) async fn run(self) {
        let assigned = (self.worker_id..self.ranges.len()).step_by(self.workers.max(1));
        for idx in assigned {
            let range = &self.ranges[idx];
            let sampled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                sampled = self.first_record(range) => sampled,
            };
            let record = match sampled {
                Ok(record) => record,
                Err(err) => {
                    warn!(range_idx = idx, range = %range, error = %err, "sample fetcher failed");
                    self.metrics.record_fetcher_error();
                    self.error.set(err);
                    return;
                }
            };
            self.metrics.record_range(record.is_some());

            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                sent = self.tx.send(record) => sent,
            };
            if sent.is_err() {
                debug!(range_idx = idx, "sample syncer went away");
                return;
            }
        }
    }

    async fn first_record(&self, range: &KeyRange) -> SampleResult<Option<RawRecord>> {
        let iter =
            ShardIterator::open(Arc::clone(&self.snapshot), range.clone(), self.scan_budget).await?;
        self.metrics.record_retries(iter.retries());
        if !iter.valid() {
            return Ok(None);
        }
        Ok(Some(RawRecord {
            handle: iter.handle()?,
            value: iter.value().to_vec(),
        }))
    }
}
