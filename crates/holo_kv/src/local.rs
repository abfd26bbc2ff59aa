//! Single-node store: one engine, one implicit shard.

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::{MemEngine, Timestamp};
use crate::error::KvResult;
use crate::range::KeyRange;
use crate::store::{Snapshot, SourceSnapshot, Store};

#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    engine: Arc<MemEngine>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, commit_ts: Timestamp) -> KvResult<()> {
        self.engine.put(key, value, commit_ts)
    }

    pub fn delete(&self, key: Vec<u8>, commit_ts: Timestamp) -> KvResult<()> {
        self.engine.delete(key, commit_ts)
    }

    pub fn write_batch(
        &self,
        items: Vec<(Vec<u8>, Option<Vec<u8>>)>,
        commit_ts: Timestamp,
    ) -> KvResult<()> {
        self.engine.write_batch(items, commit_ts)
    }

    pub fn latest_ts(&self) -> Timestamp {
        self.engine.latest_ts()
    }
}

#[async_trait]
impl Store for LocalStore {
    async fn shards_overlapping(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> KvResult<Vec<KeyRange>> {
        // The whole keyspace lives on this node.
        Ok(vec![KeyRange::new(start_key, end_key)])
    }

    async fn snapshot_at(&self, read_ts: Timestamp) -> KvResult<Arc<dyn Snapshot>> {
        Ok(Arc::new(SourceSnapshot::new(
            Arc::clone(&self.engine),
            read_ts,
        )))
    }

    fn is_sharded(&self) -> bool {
        false
    }
}
