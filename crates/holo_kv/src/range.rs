//! Half-open key intervals and byte-bound helpers.
//!
//! Bounds compare in unsigned lexicographic order. An empty start bound means
//! "from the beginning of the keyspace" and an empty end bound means
//! "unbounded above".

use std::fmt;

use serde::{Deserialize, Serialize};

/// One `[start_key, end_key)` interval of the keyspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    /// Inclusive start bound.
    #[serde(default)]
    pub start_key: Vec<u8>,
    /// Exclusive end bound, empty means unbounded.
    #[serde(default)]
    pub end_key: Vec<u8>,
}

impl KeyRange {
    pub fn new(start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>) -> Self {
        Self {
            start_key: start_key.into(),
            end_key: end_key.into(),
        }
    }

    /// Range covering the whole keyspace.
    pub fn full() -> Self {
        Self::default()
    }

    /// Returns `true` when no key can fall inside the range.
    pub fn is_empty(&self) -> bool {
        !self.end_key.is_empty() && self.start_key >= self.end_key
    }

    pub fn is_unbounded(&self) -> bool {
        self.end_key.is_empty()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key_in_range(key, &self.start_key, &self.end_key)
    }

    /// Intersects two ranges, returning `None` when they do not overlap.
    pub fn intersect(&self, other: &KeyRange) -> Option<KeyRange> {
        let range = KeyRange {
            start_key: max_bytes(&self.start_key, &other.start_key),
            end_key: min_end_bound(&self.end_key, &other.end_key),
        };
        if range.is_empty() {
            None
        } else {
            Some(range)
        }
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = if self.end_key.is_empty() {
            "+inf".to_string()
        } else {
            hex::encode(&self.end_key)
        };
        write!(f, "[{}, {})", hex::encode(&self.start_key), end)
    }
}

/// Returns the lexicographically larger of two start bounds.
pub fn max_bytes(left: &[u8], right: &[u8]) -> Vec<u8> {
    // An empty `right` is the lowest possible start bound.
    if right.is_empty() || left >= right {
        left.to_vec()
    } else {
        right.to_vec()
    }
}

/// Returns the tighter exclusive end bound across two optional bounds.
pub fn min_end_bound(left: &[u8], right: &[u8]) -> Vec<u8> {
    match (left.is_empty(), right.is_empty()) {
        (true, true) => Vec::new(),
        (true, false) => right.to_vec(),
        (false, true) => left.to_vec(),
        (false, false) => {
            if left <= right {
                left.to_vec()
            } else {
                right.to_vec()
            }
        }
    }
}

/// Checks whether `key` is within `[start, end)` where empty bounds are open.
pub fn key_in_range(key: &[u8], start: &[u8], end: &[u8]) -> bool {
    let in_start = start.is_empty() || key >= start;
    let in_end = end.is_empty() || key < end;
    in_start && in_end
}
