//! Shard placement for the sharded store.
//!
//! A topology is an ordered list of shards whose `[start_key, end_key)`
//! bounds tile the keyspace without overlap. It can be loaded from the
//! cluster-state JSON document emitted by placement services.

use serde::Deserialize;

use crate::error::{KvError, KvResult};
use crate::range::{key_in_range, KeyRange};

/// Materialized view of shard ownership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterTopology {
    /// Shard descriptors sorted by start key.
    pub shards: Vec<TopologyShard>,
}

/// One contiguous key interval owned by a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyShard {
    /// Stable shard id.
    pub shard_id: u64,
    /// Node id currently holding the lease.
    pub leaseholder: u64,
    /// Inclusive start key.
    pub start_key: Vec<u8>,
    /// Exclusive end key, empty means unbounded.
    pub end_key: Vec<u8>,
}

impl TopologyShard {
    pub fn range(&self) -> KeyRange {
        KeyRange::new(self.start_key.clone(), self.end_key.clone())
    }
}

impl ClusterTopology {
    /// Topology with one shard spanning the whole keyspace.
    pub fn single_shard(leaseholder: u64) -> Self {
        Self {
            shards: vec![TopologyShard {
                shard_id: 1,
                leaseholder,
                start_key: Vec::new(),
                end_key: Vec::new(),
            }],
        }
    }

    /// Parses a cluster-state JSON payload.
    pub fn from_json(raw: &str) -> KvResult<Self> {
        let parsed: ClusterStateView = serde_json::from_str(raw)
            .map_err(|err| KvError::Codec(format!("parse cluster state: {err}")))?;
        let mut shards = parsed
            .shards
            .into_iter()
            .map(|shard| TopologyShard {
                shard_id: shard.shard_id,
                leaseholder: shard.leaseholder,
                start_key: shard.start_key,
                end_key: shard.end_key,
            })
            .collect::<Vec<_>>();
        shards.sort_by(|left, right| left.start_key.cmp(&right.start_key));

        let topology = Self { shards };
        topology.validate()?;
        Ok(topology)
    }

    /// Checks that shards are sorted, non-empty and pairwise disjoint.
    pub fn validate(&self) -> KvResult<()> {
        for shard in &self.shards {
            if shard.range().is_empty() {
                return Err(KvError::Codec(format!(
                    "shard {} has empty range {}",
                    shard.shard_id,
                    shard.range()
                )));
            }
        }
        for pair in self.shards.windows(2) {
            let (left, right) = (&pair[0], &pair[1]);
            if left.end_key.is_empty() || left.end_key > right.start_key {
                return Err(KvError::Codec(format!(
                    "shards {} and {} overlap",
                    left.shard_id, right.shard_id
                )));
            }
        }
        Ok(())
    }

    /// Fails when the topology has no shards at all.
    pub fn require_non_empty(&self) -> KvResult<()> {
        if self.shards.is_empty() {
            return Err(KvError::TopologyUnavailable(
                "cluster topology has no shards".to_string(),
            ));
        }
        Ok(())
    }

    /// Intersects `[start_key, end_key)` with every shard, in key order.
    pub fn shards_overlapping(&self, start_key: &[u8], end_key: &[u8]) -> Vec<KeyRange> {
        let requested = KeyRange::new(start_key, end_key);
        self.shards
            .iter()
            .filter_map(|shard| shard.range().intersect(&requested))
            .collect()
    }

    /// Index of the shard owning `key`.
    pub fn locate(&self, key: &[u8]) -> Option<usize> {
        self.shards
            .iter()
            .position(|shard| key_in_range(key, &shard.start_key, &shard.end_key))
    }

    pub fn max_shard_id(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| shard.shard_id)
            .max()
            .unwrap_or(0)
    }
}

/// Wire model for the cluster state payload.
#[derive(Debug, Deserialize)]
struct ClusterStateView {
    #[serde(default)]
    shards: Vec<ShardView>,
}

/// Wire model for one shard entry.
#[derive(Debug, Deserialize)]
struct ShardView {
    shard_id: u64,
    #[serde(default)]
    leaseholder: u64,
    #[serde(default)]
    start_key: Vec<u8>,
    #[serde(default)]
    end_key: Vec<u8>,
}
