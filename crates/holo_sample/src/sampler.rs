//! Public entry point: fills caller buffers with one sampled row per shard
//! range.
//!
//! The first `next` splits the table into shard ranges and pins a snapshot.
//! Every `next` then detaches a prefix of the pending ranges no longer than
//! the buffer's free space, scans it with up to `concurrency` fetchers and
//! appends the decoded rows in range order. All fetchers of a batch are
//! joined before `next` returns.

use std::collections::VecDeque;
use std::sync::Arc;

use holo_kv::range::KeyRange;
use holo_kv::{Snapshot, Store, Timestamp};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SamplerConfig;
use crate::decoder::{RowDecoder, ScratchMap, TableRowDecoder};
use crate::error::{SampleError, SampleResult};
use crate::fetcher::{ErrorSlot, LiveFetchers, ShardFetcher};
use crate::handoff;
use crate::metrics::SampleMetrics;
use crate::plan::{ColumnPlan, SessionContext, TableSchema};
use crate::row::RowBuffer;
use crate::splitter::RangeSplitter;
use crate::syncer::{FetcherLink, OrderedSyncer};

/// Lifecycle of a [`TableSampler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplerState {
    /// Ranges not computed yet.
    Fresh,
    /// Ranges and snapshot ready; waiting for the next buffer.
    Armed,
    /// A batch is in flight.
    Streaming,
    /// Every range visited, or the sampler was closed.
    Done,
    /// A `next` failed; every later call returns this error.
    Failed(SampleError),
}

/// Cancels a sampler from another task, including a `next` in flight.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    token: CancellationToken,
}

impl CloseHandle {
    /// Requests cancellation. Safe to call any number of times.
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Whether `close` was requested on this sampler.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Samples the first record of every shard range of one table at a fixed
/// read timestamp.
///
/// Built with [`TableSampler::new`] and driven by repeated [`next`] calls
/// until [`finished`] returns `true`.
///
/// [`next`]: TableSampler::next
/// [`finished`]: TableSampler::finished
pub struct TableSampler {
    store: Arc<dyn Store>,
    plan: Arc<ColumnPlan>,
    physical_ids: Vec<u64>,
    decoder: Arc<dyn RowDecoder>,
    session: SessionContext,
    config: SamplerConfig,
    read_ts: Timestamp,
    state: SamplerState,
    pending: VecDeque<KeyRange>,
    snapshot: Option<Arc<dyn Snapshot>>,
    scratch: ScratchMap,
    close_token: CancellationToken,
    live: Arc<LiveFetchers>,
    metrics: Arc<SampleMetrics>,
}

impl TableSampler {
    /// Samples `requested` columns of `schema` as of `read_ts`.
    pub fn new(
        store: Arc<dyn Store>,
        schema: &TableSchema,
        requested: &[&str],
        read_ts: Timestamp,
        config: SamplerConfig,
    ) -> SampleResult<Self> {
        let plan = ColumnPlan::resolve(schema, requested)?;
        Ok(Self::from_plan(
            store,
            Arc::new(plan),
            schema.physical_ids(),
            read_ts,
            config,
        ))
    }

    /// Samples with an already resolved plan over the given physical ids.
    pub fn from_plan(
        store: Arc<dyn Store>,
        plan: Arc<ColumnPlan>,
        physical_ids: Vec<u64>,
        read_ts: Timestamp,
        config: SamplerConfig,
    ) -> Self {
        Self {
            store,
            plan,
            physical_ids,
            decoder: Arc::new(TableRowDecoder),
            session: SessionContext::default(),
            config,
            read_ts,
            state: SamplerState::Fresh,
            pending: VecDeque::new(),
            snapshot: None,
            scratch: ScratchMap::new(),
            close_token: CancellationToken::new(),
            live: Arc::default(),
            metrics: Arc::default(),
        }
    }

    /// Replaces the default `rowcodec` decoder.
    pub fn with_decoder(mut self, decoder: Arc<dyn RowDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Session settings applied while decoding, such as the time zone.
    pub fn with_session(mut self, session: SessionContext) -> Self {
        self.session = session;
        self
    }

    /// Reports into a shared counter set instead of a private one.
    pub fn with_metrics(mut self, metrics: Arc<SampleMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Column plan resolved at construction.
    pub fn plan(&self) -> &ColumnPlan {
        &self.plan
    }

    pub fn state(&self) -> &SamplerState {
        &self.state
    }

    pub fn metrics(&self) -> Arc<SampleMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Ranges not yet visited. Empty until the first `next`.
    pub fn pending_ranges(&self) -> usize {
        self.pending.len()
    }

    /// Fetcher tasks still running.
    pub fn live_fetchers(&self) -> usize {
        self.live.count()
    }

    /// Handle that can close this sampler from another task.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            token: self.close_token.clone(),
        }
    }

    /// `true` once no further rows will be produced.
    pub fn finished(&self) -> bool {
        matches!(self.state, SamplerState::Done)
    }

    /// Appends sampled rows to `buf` until it is full or every range has
    /// been visited.
    ///
    /// A call that fails leaves `buf` as it was. A call interrupted by
    /// [`CloseHandle::close`] returns [`SampleError::Cancelled`] and the
    /// sampler is done; later calls are no-ops. Dropping the returned future
    /// also restores `buf`, and the interrupted batch is sampled again by the
    /// next call.
    pub async fn next(&mut self, buf: &mut RowBuffer) -> SampleResult<()> {
        match &self.state {
            SamplerState::Done => return Ok(()),
            SamplerState::Failed(err) => return Err(err.clone()),
            _ => {}
        }
        if matches!(self.state, SamplerState::Streaming) {
            debug!(
                table_id = self.plan.table_id(),
                pending_ranges = self.pending.len(),
                "resuming after an interrupted sample batch"
            );
            self.scratch.clear();
            self.state = SamplerState::Armed;
        }
        if self.close_token.is_cancelled() {
            self.shut_down();
            return Ok(());
        }

        let mut rollback = BufferRollback::new(buf);
        match self.fill(&mut *rollback.buf).await {
            Ok(()) => {
                let rows = rollback.commit();
                self.metrics.record_rows(rows);
                if self.pending.is_empty() {
                    self.state = SamplerState::Done;
                }
                info!(
                    table_id = self.plan.table_id(),
                    rows,
                    pending_ranges = self.pending.len(),
                    finished = self.finished(),
                    "sample next completed"
                );
                Ok(())
            }
            Err(SampleError::Cancelled) => {
                drop(rollback);
                self.shut_down();
                info!(table_id = self.plan.table_id(), "sample cancelled");
                Err(SampleError::Cancelled)
            }
            Err(err) => {
                drop(rollback);
                warn!(table_id = self.plan.table_id(), error = %err, "sample failed");
                self.pending.clear();
                self.snapshot = None;
                self.state = SamplerState::Failed(err.clone());
                Err(err)
            }
        }
    }

    /// Stops the sampler and waits for any fetcher still winding down.
    /// Idempotent; the sampler is done afterwards.
    pub async fn close(&mut self) {
        self.close_token.cancel();
        self.live.wait_idle().await;
        if !self.finished() {
            debug!(table_id = self.plan.table_id(), "sampler closed");
        }
        self.shut_down();
    }

    fn shut_down(&mut self) {
        self.pending.clear();
        self.snapshot = None;
        self.scratch.clear();
        self.state = SamplerState::Done;
    }

    async fn fill(&mut self, buf: &mut RowBuffer) -> SampleResult<()> {
        if matches!(self.state, SamplerState::Fresh) {
            let close = self.close_token.clone();
            tokio::select! {
                biased;
                _ = close.cancelled() => return Err(SampleError::Cancelled),
                armed = self.arm() => armed?,
            }
        }

        while buf.remaining_capacity() > 0 && !self.pending.is_empty() {
            let batch_size = self.pending.len().min(buf.remaining_capacity());
            // Ranges leave `pending` only once the whole batch is delivered.
            let batch = self.pending.iter().take(batch_size).cloned().collect::<Vec<_>>();
            self.state = SamplerState::Streaming;
            self.run_batch(batch, buf).await?;
            self.pending.drain(..batch_size);
            self.state = SamplerState::Armed;
        }
        Ok(())
    }

    async fn arm(&mut self) -> SampleResult<()> {
        let splitter = RangeSplitter::new(
            Arc::clone(&self.store),
            self.config.region_lookup_budget(),
            Arc::clone(&self.metrics),
        );
        let ranges = splitter
            .split(&self.physical_ids, self.config.direction)
            .await?;
        let snapshot = self.store.snapshot_at(self.read_ts).await?;
        debug!(
            table_id = self.plan.table_id(),
            ranges = ranges.len(),
            read_ts = snapshot.read_ts(),
            "sampler armed"
        );
        self.pending = ranges.into();
        self.snapshot = Some(snapshot);
        self.state = SamplerState::Armed;
        Ok(())
    }

    async fn run_batch(&mut self, batch: Vec<KeyRange>, buf: &mut RowBuffer) -> SampleResult<()> {
        let snapshot = self
            .snapshot
            .clone()
            .ok_or_else(|| SampleError::Internal("sample batch without snapshot".into()))?;
        let ranges: Arc<[KeyRange]> = batch.into();
        let workers = ranges.len().min(self.config.effective_concurrency());
        let batch_token = self.close_token.child_token();
        self.metrics.record_batch(workers);
        debug!(ranges = ranges.len(), workers, "dispatching sample batch");

        let mut tasks = JoinSet::new();
        let mut links = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let (tx, rx) = handoff::rendezvous();
            let error = ErrorSlot::default();
            let fetcher = ShardFetcher {
                worker_id,
                workers,
                ranges: Arc::clone(&ranges),
                snapshot: Arc::clone(&snapshot),
                scan_budget: self.config.scan_budget(),
                tx,
                error: error.clone(),
                cancel: batch_token.clone(),
                metrics: Arc::clone(&self.metrics),
                _live: self.live.enter(),
            };
            let span = info_span!(
                "holo_sample.fetcher",
                table_id = self.plan.table_id(),
                worker_id = worker_id,
                workers = workers
            );
            tasks.spawn(fetcher.run().instrument(span));
            links.push(FetcherLink::new(rx, error));
        }

        let plan = &self.plan;
        let decoder = &self.decoder;
        let session = &self.session;
        let scratch = &mut self.scratch;
        let result = OrderedSyncer::new(links, ranges.len(), batch_token.clone())
            .run(|record| {
                let row = decoder.decode(record.handle, &record.value, plan, session, scratch);
                scratch.clear();
                buf.push(row?)
            })
            .await;

        batch_token.cancel();
        let mut result = result;
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                if result.is_ok() {
                    result = Err(SampleError::Internal(format!("sample fetcher failed: {err}")));
                }
            }
        }
        result
    }
}

/// Truncates a caller buffer back to its entry length unless committed.
struct BufferRollback<'a> {
    buf: &'a mut RowBuffer,
    start_len: usize,
    committed: bool,
}

impl<'a> BufferRollback<'a> {
    fn new(buf: &'a mut RowBuffer) -> Self {
        let start_len = buf.len();
        Self {
            buf,
            start_len,
            committed: false,
        }
    }

    /// Keeps the appended rows and returns how many there are.
    fn commit(mut self) -> usize {
        self.committed = true;
        self.buf.len() - self.start_len
    }
}

impl Drop for BufferRollback<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.buf.truncate(self.start_len);
        }
    }
}

#[cfg(test)]
mod tests {
    use holo_kv::rowcodec::ColumnType;
    use holo_kv::LocalStore;

    use super::*;
    use crate::plan::ColumnDef;

    #[tokio::test]
    async fn empty_local_table_finishes_without_rows() {
        let schema = TableSchema::new(1, vec![ColumnDef::new(1, "id", ColumnType::Int64)])
            .with_handle_column("id");
        let mut sampler = TableSampler::new(
            Arc::new(LocalStore::new()),
            &schema,
            &["id"],
            1,
            SamplerConfig::default(),
        )
        .unwrap();
        assert_eq!(sampler.state(), &SamplerState::Fresh);

        let mut buf = RowBuffer::with_capacity(4);
        sampler.next(&mut buf).await.unwrap();
        assert!(buf.is_empty());
        assert!(sampler.finished());
        assert_eq!(sampler.live_fetchers(), 0);
    }

    #[tokio::test]
    async fn zero_capacity_buffer_does_not_consume_ranges() {
        let schema = TableSchema::new(1, vec![ColumnDef::new(1, "id", ColumnType::Int64)])
            .with_handle_column("id");
        let mut sampler = TableSampler::new(
            Arc::new(LocalStore::new()),
            &schema,
            &["id"],
            1,
            SamplerConfig::default(),
        )
        .unwrap();
        sampler.next(&mut RowBuffer::with_capacity(0)).await.unwrap();
        assert_eq!(sampler.state(), &SamplerState::Armed);
        assert_eq!(sampler.pending_ranges(), 1);
        assert!(!sampler.finished());
    }

    #[tokio::test]
    async fn close_before_first_next_finishes() {
        let schema = TableSchema::new(1, vec![ColumnDef::new(1, "id", ColumnType::Int64)]);
        let mut sampler = TableSampler::new(
            Arc::new(LocalStore::new()),
            &schema,
            &["id"],
            1,
            SamplerConfig::default(),
        )
        .unwrap();
        sampler.close().await;
        sampler.close().await;
        assert!(sampler.finished());
        let mut buf = RowBuffer::with_capacity(2);
        sampler.next(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }
}
