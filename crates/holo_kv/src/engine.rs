//! In-memory multi-version key/value engine.
//!
//! Every key keeps its versions sorted by commit timestamp. A snapshot read
//! at `read_ts` observes the newest version committed at or before `read_ts`;
//! tombstones hide the key entirely.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::error::{KvError, KvResult};
use crate::range::KeyRange;
use crate::store::SeekSource;

/// Logical commit / read timestamp.
pub type Timestamp = u64;

#[derive(Clone, Debug)]
struct VersionedValue {
    commit_ts: Timestamp,
    value: Option<Vec<u8>>,
}

type VersionMap = BTreeMap<Vec<u8>, Vec<VersionedValue>>;

/// Ordered MVCC map guarded by a reader/writer lock.
#[derive(Debug, Default)]
pub struct MemEngine {
    inner: RwLock<VersionMap>,
    latest_ts: AtomicU64,
}

impl MemEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, commit_ts: Timestamp) -> KvResult<()> {
        self.write_batch(vec![(key, Some(value))], commit_ts)
    }

    pub fn delete(&self, key: Vec<u8>, commit_ts: Timestamp) -> KvResult<()> {
        self.write_batch(vec![(key, None)], commit_ts)
    }

    /// Applies all writes atomically at one commit timestamp. `None` values
    /// are tombstones.
    pub fn write_batch(
        &self,
        items: Vec<(Vec<u8>, Option<Vec<u8>>)>,
        commit_ts: Timestamp,
    ) -> KvResult<()> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        for (key, value) in items {
            let versions = guard.entry(key).or_default();
            match versions.binary_search_by(|v| v.commit_ts.cmp(&commit_ts)) {
                Ok(idx) => versions[idx].value = value,
                Err(idx) => versions.insert(idx, VersionedValue { commit_ts, value }),
            }
        }
        self.latest_ts.fetch_max(commit_ts, Ordering::SeqCst);
        Ok(())
    }

    /// Point read at `read_ts`.
    pub fn get(&self, key: &[u8], read_ts: Timestamp) -> KvResult<Option<Vec<u8>>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard
            .get(key)
            .and_then(|versions| find_visible_version(versions, read_ts))
            .map(<[u8]>::to_vec))
    }

    /// Highest commit timestamp ever applied.
    pub fn latest_ts(&self) -> Timestamp {
        self.latest_ts.load(Ordering::SeqCst)
    }

    /// Number of distinct keys, including keys whose newest version is a
    /// tombstone.
    pub fn key_count(&self) -> usize {
        self.inner.read().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Moves every key `>= split_key` into a new engine.
    pub(crate) fn split_off(&self, split_key: &[u8]) -> KvResult<MemEngine> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        let right = guard.split_off(split_key);
        Ok(MemEngine {
            inner: RwLock::new(right),
            latest_ts: AtomicU64::new(self.latest_ts()),
        })
    }
}

impl SeekSource for MemEngine {
    fn seek(
        &self,
        range: &KeyRange,
        after: Option<&[u8]>,
        read_ts: Timestamp,
    ) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        let lower = match after {
            Some(after) if after >= range.start_key.as_slice() => Bound::Excluded(after),
            _ => Bound::Included(range.start_key.as_slice()),
        };
        let lower_key = match lower {
            Bound::Included(key) | Bound::Excluded(key) => key,
            Bound::Unbounded => &[][..],
        };
        if !range.end_key.is_empty() && lower_key >= range.end_key.as_slice() {
            return Ok(None);
        }
        let upper = if range.end_key.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(range.end_key.as_slice())
        };

        let guard = self.inner.read().map_err(|_| poisoned())?;
        for (key, versions) in guard.range::<[u8], _>((lower, upper)) {
            if let Some(value) = find_visible_version(versions, read_ts) {
                return Ok(Some((key.clone(), value.to_vec())));
            }
        }
        Ok(None)
    }
}

/// Returns the newest non-tombstone value committed at or before `read_ts`.
fn find_visible_version(versions: &[VersionedValue], read_ts: Timestamp) -> Option<&[u8]> {
    let idx = match versions.binary_search_by(|v| v.commit_ts.cmp(&read_ts)) {
        Ok(idx) => idx,
        Err(0) => return None,
        Err(idx) => idx - 1,
    };
    versions[idx].value.as_deref()
}

fn poisoned() -> KvError {
    KvError::Io("memory engine lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: &[u8], end: &[u8]) -> KeyRange {
        KeyRange::new(start.to_vec(), end.to_vec())
    }

    #[test]
    fn reads_respect_snapshot_timestamp() {
        let engine = MemEngine::new();
        engine.put(b"a".to_vec(), b"v1".to_vec(), 5).unwrap();
        engine.put(b"a".to_vec(), b"v2".to_vec(), 9).unwrap();

        assert_eq!(engine.get(b"a", 4).unwrap(), None);
        assert_eq!(engine.get(b"a", 5).unwrap(), Some(b"v1".to_vec()));
        assert_eq!(engine.get(b"a", 8).unwrap(), Some(b"v1".to_vec()));
        assert_eq!(engine.get(b"a", 9).unwrap(), Some(b"v2".to_vec()));
        assert_eq!(engine.latest_ts(), 9);
    }

    #[test]
    fn tombstones_hide_newer_snapshots_only() {
        let engine = MemEngine::new();
        engine.put(b"k".to_vec(), b"v".to_vec(), 1).unwrap();
        engine.delete(b"k".to_vec(), 3).unwrap();

        assert_eq!(engine.get(b"k", 2).unwrap(), Some(b"v".to_vec()));
        assert_eq!(engine.get(b"k", 3).unwrap(), None);
        assert_eq!(engine.key_count(), 1);
    }

    #[test]
    fn seek_skips_invisible_keys_and_honors_after() {
        let engine = MemEngine::new();
        engine.put(b"a".to_vec(), b"1".to_vec(), 1).unwrap();
        engine.put(b"b".to_vec(), b"2".to_vec(), 7).unwrap();
        engine.put(b"c".to_vec(), b"3".to_vec(), 1).unwrap();

        let all = range(b"", b"");
        let first = engine.seek(&all, None, 5).unwrap().unwrap();
        assert_eq!(first.0, b"a".to_vec());
        // `b` is committed after the snapshot and must be skipped.
        let second = engine.seek(&all, Some(b"a"), 5).unwrap().unwrap();
        assert_eq!(second.0, b"c".to_vec());
        assert_eq!(engine.seek(&all, Some(b"c"), 5).unwrap(), None);
    }

    #[test]
    fn seek_stays_inside_range() {
        let engine = MemEngine::new();
        engine.put(b"a".to_vec(), b"1".to_vec(), 1).unwrap();
        engine.put(b"m".to_vec(), b"2".to_vec(), 1).unwrap();

        assert_eq!(engine.seek(&range(b"b", b"m"), None, 1).unwrap(), None);
        assert_eq!(engine.seek(&range(b"m", b"m"), None, 1).unwrap(), None);
        assert_eq!(engine.seek(&range(b"a", b"b"), Some(b"z"), 1).unwrap(), None);
    }

    #[test]
    fn split_off_moves_right_hand_keys() {
        let engine = MemEngine::new();
        for key in [b"a", b"b", b"c", b"d"] {
            engine.put(key.to_vec(), key.to_vec(), 2).unwrap();
        }
        let right = engine.split_off(b"c").unwrap();
        assert_eq!(engine.key_count(), 2);
        assert_eq!(right.key_count(), 2);
        assert_eq!(right.get(b"c", 2).unwrap(), Some(b"c".to_vec()));
        assert_eq!(engine.get(b"c", 2).unwrap(), None);
        assert_eq!(right.latest_ts(), 2);
    }
}
