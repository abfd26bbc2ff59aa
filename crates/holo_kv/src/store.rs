//! Capability traits shared by the local and sharded store variants.
//!
//! A sampler or scanner only needs three things from storage: which shards
//! overlap a key interval, a consistent snapshot at a timestamp, and forward
//! iteration over a range of that snapshot.

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::Timestamp;
use crate::error::KvResult;
use crate::range::KeyRange;

/// Entry point to one logical key/value store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the shard-aligned ranges intersecting `[start_key, end_key)`,
    /// sorted by start key. An empty result means no shard covers the
    /// interval.
    async fn shards_overlapping(&self, start_key: &[u8], end_key: &[u8])
        -> KvResult<Vec<KeyRange>>;

    /// Pins a consistent read view at `read_ts`.
    async fn snapshot_at(&self, read_ts: Timestamp) -> KvResult<Arc<dyn Snapshot>>;

    /// `false` for single-node stores whose keyspace is one shard.
    fn is_sharded(&self) -> bool;
}

/// Immutable read view shared by every reader of one query.
#[async_trait]
pub trait Snapshot: Send + Sync {
    fn read_ts(&self) -> Timestamp;

    /// Opens a forward iterator positioned at the first visible key of `range`.
    async fn iterate(&self, range: &KeyRange) -> KvResult<Box<dyn KvIterator>>;
}

/// Forward cursor over visible keys of one range.
#[async_trait]
pub trait KvIterator: Send {
    fn valid(&self) -> bool;

    /// Current key; empty once the iterator is exhausted.
    fn key(&self) -> &[u8];

    /// Current value; empty once the iterator is exhausted.
    fn value(&self) -> &[u8];

    async fn advance(&mut self) -> KvResult<()>;
}

/// Positioned lookup used to drive [`RangeIterator`].
pub(crate) trait SeekSource: Send + Sync {
    /// Returns the first visible entry of `range` strictly after `after`
    /// (or at the range start when `after` is `None`).
    fn seek(
        &self,
        range: &KeyRange,
        after: Option<&[u8]>,
        read_ts: Timestamp,
    ) -> KvResult<Option<(Vec<u8>, Vec<u8>)>>;
}

/// Iterator that re-seeks after the current key on every step, so no engine
/// lock is held between calls.
pub(crate) struct RangeIterator<S> {
    source: Arc<S>,
    range: KeyRange,
    read_ts: Timestamp,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl<S: SeekSource> RangeIterator<S> {
    pub(crate) fn open(source: Arc<S>, range: KeyRange, read_ts: Timestamp) -> KvResult<Self> {
        let current = source.seek(&range, None, read_ts)?;
        Ok(Self {
            source,
            range,
            read_ts,
            current,
        })
    }
}

#[async_trait]
impl<S: SeekSource + 'static> KvIterator for RangeIterator<S> {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|(key, _)| key.as_slice()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.current
            .as_ref()
            .map(|(_, value)| value.as_slice())
            .unwrap_or(&[])
    }

    async fn advance(&mut self) -> KvResult<()> {
        let Some((key, _)) = self.current.take() else {
            return Ok(());
        };
        self.current = self.source.seek(&self.range, Some(&key), self.read_ts)?;
        Ok(())
    }
}

/// Snapshot over a single [`SeekSource`].
pub(crate) struct SourceSnapshot<S> {
    source: Arc<S>,
    read_ts: Timestamp,
}

impl<S> SourceSnapshot<S> {
    pub(crate) fn new(source: Arc<S>, read_ts: Timestamp) -> Self {
        Self { source, read_ts }
    }
}

#[async_trait]
impl<S: SeekSource + 'static> Snapshot for SourceSnapshot<S> {
    fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    async fn iterate(&self, range: &KeyRange) -> KvResult<Box<dyn KvIterator>> {
        let iter = RangeIterator::open(Arc::clone(&self.source), range.clone(), self.read_ts)?;
        Ok(Box::new(iter))
    }
}
