//! Record-only cursor over one shard range.
//!
//! Opening and advancing share one scan backoff budget. A retryable error
//! while advancing reopens the underlying iterator just after the last key
//! seen, so a shard split between two steps does not restart the range.

use std::sync::Arc;
use std::time::Duration;

use holo_kv::range::KeyRange;
use holo_kv::tablecodec::{self, Handle};
use holo_kv::{KvError, KvIterator, Snapshot};
use tracing::warn;

use crate::backoff::Backoffer;
use crate::error::{SampleError, SampleResult};

/// Cursor over the record keys of one shard range at a snapshot.
///
/// Metadata and index keys inside the range are skipped. Errors are sticky:
/// once a step fails the iterator is invalid and reports that error.
pub struct ShardIterator {
    snapshot: Arc<dyn Snapshot>,
    range: KeyRange,
    inner: Option<Box<dyn KvIterator>>,
    backoff: Backoffer,
    error: Option<SampleError>,
}

impl ShardIterator {
    /// Opens `range` and positions on its first record key.
    pub async fn open(
        snapshot: Arc<dyn Snapshot>,
        range: KeyRange,
        scan_budget: Duration,
    ) -> SampleResult<Self> {
        let mut backoff = Backoffer::new(scan_budget);
        let inner = open_with_backoff(snapshot.as_ref(), &range, &mut backoff, None).await?;
        let mut iter = Self {
            snapshot,
            range,
            inner: Some(inner),
            backoff,
            error: None,
        };
        iter.skip_non_records().await?;
        Ok(iter)
    }

    /// `false` once the range is exhausted or an error was hit.
    pub fn valid(&self) -> bool {
        self.error.is_none() && self.inner.as_ref().is_some_and(|inner| inner.valid())
    }

    pub fn key(&self) -> &[u8] {
        match &self.inner {
            Some(inner) if self.error.is_none() => inner.key(),
            _ => &[],
        }
    }

    pub fn value(&self) -> &[u8] {
        match &self.inner {
            Some(inner) if self.error.is_none() => inner.value(),
            _ => &[],
        }
    }

    pub fn handle(&self) -> SampleResult<Handle> {
        Ok(tablecodec::decode_handle(self.key())?)
    }

    /// Error that invalidated the iterator, if any.
    pub fn error(&self) -> Option<&SampleError> {
        self.error.as_ref()
    }

    /// Backoff sleeps taken so far.
    pub fn retries(&self) -> u32 {
        self.backoff.attempts()
    }

    pub fn range(&self) -> &KeyRange {
        &self.range
    }

    /// Moves to the next record key. After an error every call returns the
    /// same error.
    pub async fn advance(&mut self) -> SampleResult<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let result = match self.step().await {
            Ok(()) => self.skip_non_records().await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            self.inner = None;
            self.error = Some(err.clone());
        }
        result
    }

    async fn skip_non_records(&mut self) -> SampleResult<()> {
        loop {
            let positioned = match &self.inner {
                Some(inner) => !inner.valid() || tablecodec::is_record_key(inner.key()),
                None => true,
            };
            if positioned {
                return Ok(());
            }
            self.step().await?;
        }
    }

    async fn step(&mut self) -> SampleResult<()> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(());
        };
        if !inner.valid() {
            return Ok(());
        }
        let mut resume_from = inner.key().to_vec();
        resume_from.push(0);

        match inner.advance().await {
            Ok(()) => Ok(()),
            Err(err) if err.is_retryable() => {
                warn!(range = %self.range, error = %err, "shard iterator advance failed, reopening");
                let rest = KeyRange::new(resume_from, self.range.end_key.clone());
                self.inner = Some(
                    open_with_backoff(self.snapshot.as_ref(), &rest, &mut self.backoff, Some(err))
                        .await?,
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Opens `range`, retrying retryable errors until `backoff` runs dry.
/// `pending` is an error already observed before the first attempt.
async fn open_with_backoff(
    snapshot: &dyn Snapshot,
    range: &KeyRange,
    backoff: &mut Backoffer,
    mut pending: Option<KvError>,
) -> SampleResult<Box<dyn KvIterator>> {
    loop {
        if let Some(err) = pending.take() {
            if !backoff.wait("shard iterator").await {
                return Err(SampleError::StorageTimeout {
                    budget_ms: backoff.budget_ms(),
                    last_error: err.to_string(),
                });
            }
        }
        match snapshot.iterate(range).await {
            Ok(iter) => return Ok(iter),
            Err(err) if err.is_retryable() => pending = Some(err),
            Err(err) => return Err(err.into()),
        }
    }
}
