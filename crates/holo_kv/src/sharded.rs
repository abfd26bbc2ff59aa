//! Range-sharded store: one engine per shard, routed by key.
//!
//! Snapshots resolve shard ownership on every seek, so a split that happens
//! while a query is running never hides keys from an open iterator.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::info;

use crate::engine::{MemEngine, Timestamp};
use crate::error::{KvError, KvResult};
use crate::range::KeyRange;
use crate::store::{SeekSource, Snapshot, SourceSnapshot, Store};
use crate::topology::{ClusterTopology, TopologyShard};

#[derive(Debug)]
struct ShardedState {
    topology: ClusterTopology,
    engines: BTreeMap<u64, Arc<MemEngine>>,
}

#[derive(Debug)]
struct ShardedInner {
    state: RwLock<ShardedState>,
}

#[derive(Debug, Clone)]
pub struct ShardedStore {
    inner: Arc<ShardedInner>,
}

impl ShardedStore {
    pub fn new(topology: ClusterTopology) -> KvResult<Self> {
        topology.require_non_empty()?;
        topology.validate()?;
        let engines = topology
            .shards
            .iter()
            .map(|shard| (shard.shard_id, Arc::new(MemEngine::new())))
            .collect();
        Ok(Self {
            inner: Arc::new(ShardedInner {
                state: RwLock::new(ShardedState { topology, engines }),
            }),
        })
    }

    /// Store with one shard covering the whole keyspace; split it with
    /// [`ShardedStore::split_at`].
    pub fn single_shard() -> Self {
        let topology = ClusterTopology::single_shard(1);
        let engines = BTreeMap::from([(1, Arc::new(MemEngine::new()))]);
        Self {
            inner: Arc::new(ShardedInner {
                state: RwLock::new(ShardedState { topology, engines }),
            }),
        }
    }

    pub fn from_json(raw: &str) -> KvResult<Self> {
        Self::new(ClusterTopology::from_json(raw)?)
    }

    /// Current topology copy.
    pub fn topology(&self) -> KvResult<ClusterTopology> {
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        Ok(state.topology.clone())
    }

    pub fn shard_count(&self) -> usize {
        self.inner
            .state
            .read()
            .map(|state| state.topology.shards.len())
            .unwrap_or(0)
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, commit_ts: Timestamp) -> KvResult<()> {
        self.write_batch(vec![(key, Some(value))], commit_ts)
    }

    pub fn delete(&self, key: Vec<u8>, commit_ts: Timestamp) -> KvResult<()> {
        self.write_batch(vec![(key, None)], commit_ts)
    }

    /// Routes each write to its owning shard and commits them at one
    /// timestamp.
    pub fn write_batch(
        &self,
        items: Vec<(Vec<u8>, Option<Vec<u8>>)>,
        commit_ts: Timestamp,
    ) -> KvResult<()> {
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        let mut by_shard: BTreeMap<u64, Vec<(Vec<u8>, Option<Vec<u8>>)>> = BTreeMap::new();
        for (key, value) in items {
            let idx = state.topology.locate(&key).ok_or_else(|| {
                KvError::Io(format!("no shard owns key {}", hex::encode(&key)))
            })?;
            let shard_id = state.topology.shards[idx].shard_id;
            by_shard.entry(shard_id).or_default().push((key, value));
        }
        for (shard_id, batch) in by_shard {
            engine_for(&state, shard_id)?.write_batch(batch, commit_ts)?;
        }
        Ok(())
    }

    /// Splits the shard owning `split_key` so that `split_key` becomes the
    /// first key of a new shard. Returns the new shard id.
    pub fn split_at(&self, split_key: &[u8]) -> KvResult<u64> {
        let mut state = self.inner.state.write().map_err(|_| poisoned())?;
        let idx = state.topology.locate(split_key).ok_or_else(|| {
            KvError::Io(format!("no shard owns split key {}", hex::encode(split_key)))
        })?;
        let parent = state.topology.shards[idx].clone();
        if parent.start_key.as_slice() == split_key {
            return Err(KvError::Io(format!(
                "split key {} is already the start of shard {}",
                hex::encode(split_key),
                parent.shard_id
            )));
        }

        let right_engine = engine_for(&state, parent.shard_id)?.split_off(split_key)?;
        let new_shard_id = state.topology.max_shard_id() + 1;
        state.topology.shards[idx].end_key = split_key.to_vec();
        state.topology.shards.insert(
            idx + 1,
            TopologyShard {
                shard_id: new_shard_id,
                leaseholder: parent.leaseholder,
                start_key: split_key.to_vec(),
                end_key: parent.end_key.clone(),
            },
        );
        state.engines.insert(new_shard_id, Arc::new(right_engine));

        info!(
            parent_shard = parent.shard_id,
            new_shard = new_shard_id,
            split_key = %hex::encode(split_key),
            shard_count = state.topology.shards.len(),
            "shard split applied"
        );
        Ok(new_shard_id)
    }

    /// Applies several splits; keys that already start a shard are skipped.
    pub fn split_keys(&self, split_keys: &[Vec<u8>]) -> KvResult<Vec<u64>> {
        let mut created = Vec::with_capacity(split_keys.len());
        for key in split_keys {
            let already_boundary = {
                let state = self.inner.state.read().map_err(|_| poisoned())?;
                state
                    .topology
                    .shards
                    .iter()
                    .any(|shard| shard.start_key == *key)
            };
            if already_boundary {
                continue;
            }
            created.push(self.split_at(key)?);
        }
        Ok(created)
    }
}

impl SeekSource for ShardedInner {
    fn seek(
        &self,
        range: &KeyRange,
        after: Option<&[u8]>,
        read_ts: Timestamp,
    ) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        for shard in &state.topology.shards {
            let Some(window) = shard.range().intersect(range) else {
                continue;
            };
            if let Some(after) = after {
                if !window.end_key.is_empty() && after >= window.end_key.as_slice() {
                    continue;
                }
            }
            if let Some(hit) = engine_for(&state, shard.shard_id)?.seek(&window, after, read_ts)? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Store for ShardedStore {
    async fn shards_overlapping(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> KvResult<Vec<KeyRange>> {
        let state = self
            .inner
            .state
            .read()
            .map_err(|_| KvError::TopologyUnavailable("topology lock poisoned".to_string()))?;
        Ok(state.topology.shards_overlapping(start_key, end_key))
    }

    async fn snapshot_at(&self, read_ts: Timestamp) -> KvResult<Arc<dyn Snapshot>> {
        Ok(Arc::new(SourceSnapshot::new(
            Arc::clone(&self.inner),
            read_ts,
        )))
    }

    fn is_sharded(&self) -> bool {
        true
    }
}

fn engine_for(state: &ShardedState, shard_id: u64) -> KvResult<&Arc<MemEngine>> {
    state
        .engines
        .get(&shard_id)
        .ok_or_else(|| KvError::Io(format!("shard {shard_id} has no engine")))
}

fn poisoned() -> KvError {
    KvError::Io("sharded store lock poisoned".to_string())
}
