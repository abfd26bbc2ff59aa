//! Table keyspace layout.
//!
//! Every key of a table starts with the 9-byte table prefix
//! `0x20 | table_id (u64 BE)`, followed by a keyspace tag:
//!
//! - `0x01` table-local metadata,
//! - `0x02 0x00 | handle` row records (handle is a sign-flipped BE i64),
//! - `0x21 | index_id (u64 BE) | value` secondary index entries.
//!
//! Record keys therefore sort by handle, and a scan of
//! `[table_prefix, prefix_end(table_prefix))` sees metadata, records and
//! index entries of the table in that order.

use crate::error::{KvError, KvResult};
use crate::range::KeyRange;

const DATA_PREFIX_TABLE: u8 = 0x20;
const KEYSPACE_META: u8 = 0x01;
const KEYSPACE_RECORD: u8 = 0x02;
const KEYSPACE_INDEX: u8 = 0x21;
const RECORD_KEY_RESERVED: u8 = 0x00;
const SIGN_FLIP_MASK: u64 = 1u64 << 63;

const TABLE_PREFIX_LEN: usize = 1 + 8;
const RECORD_KEY_LEN: usize = TABLE_PREFIX_LEN + 1 + 1 + 8;

/// Row handle decoded from a record key.
pub type Handle = i64;

fn encode_i64_ordered(value: i64) -> [u8; 8] {
    (value as u64 ^ SIGN_FLIP_MASK).to_be_bytes()
}

fn decode_i64_ordered(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ SIGN_FLIP_MASK) as i64
}

/// Prefix shared by every key of `table_id` (or of one physical partition).
pub fn table_prefix(table_id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(TABLE_PREFIX_LEN);
    out.push(DATA_PREFIX_TABLE);
    out.extend_from_slice(&table_id.to_be_bytes());
    out
}

/// Smallest key greater than every key starting with `prefix`.
///
/// Returns `None` when `prefix` is all `0xFF` bytes (no finite upper bound).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    for idx in (0..out.len()).rev() {
        if out[idx] != 0xFF {
            out[idx] += 1;
            out.truncate(idx + 1);
            return Some(out);
        }
    }
    None
}

/// Half-open interval holding every key of `table_id`.
pub fn table_range(table_id: u64) -> KeyRange {
    let start = table_prefix(table_id);
    let end = prefix_end(&start).unwrap_or_default();
    KeyRange::new(start, end)
}

pub fn encode_record_key(table_id: u64, handle: Handle) -> Vec<u8> {
    let mut out = Vec::with_capacity(RECORD_KEY_LEN);
    out.extend_from_slice(&table_prefix(table_id));
    out.push(KEYSPACE_RECORD);
    out.push(RECORD_KEY_RESERVED);
    out.extend_from_slice(&encode_i64_ordered(handle));
    out
}

pub fn encode_meta_key(table_id: u64, name: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TABLE_PREFIX_LEN + 1 + name.len());
    out.extend_from_slice(&table_prefix(table_id));
    out.push(KEYSPACE_META);
    out.extend_from_slice(name);
    out
}

pub fn encode_index_key(table_id: u64, index_id: u64, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TABLE_PREFIX_LEN + 1 + 8 + value.len());
    out.extend_from_slice(&table_prefix(table_id));
    out.push(KEYSPACE_INDEX);
    out.extend_from_slice(&index_id.to_be_bytes());
    out.extend_from_slice(value);
    out
}

/// Classifies `key` as a row record of any table.
pub fn is_record_key(key: &[u8]) -> bool {
    key.len() == RECORD_KEY_LEN
        && key[0] == DATA_PREFIX_TABLE
        && key[TABLE_PREFIX_LEN] == KEYSPACE_RECORD
        && key[TABLE_PREFIX_LEN + 1] == RECORD_KEY_RESERVED
}

/// Extracts the row handle from a record key.
pub fn decode_handle(key: &[u8]) -> KvResult<Handle> {
    if !is_record_key(key) {
        return Err(KvError::Codec(format!(
            "not a record key: {}",
            hex::encode(key)
        )));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&key[RECORD_KEY_LEN - 8..]);
    Ok(decode_i64_ordered(bytes))
}

/// Extracts the table id from any table key.
pub fn decode_table_id(key: &[u8]) -> KvResult<u64> {
    if key.len() < TABLE_PREFIX_LEN || key[0] != DATA_PREFIX_TABLE {
        return Err(KvError::Codec(format!(
            "not a table key: {}",
            hex::encode(key)
        )));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&key[1..TABLE_PREFIX_LEN]);
    Ok(u64::from_be_bytes(bytes))
}

/// Evenly spaced record keys that pre-split handles `[min_handle, max_handle]`
/// into `regions` shards. Returns `regions - 1` keys at most, ascending and
/// deduplicated.
pub fn split_keys_for_handles(
    table_id: u64,
    min_handle: Handle,
    max_handle: Handle,
    regions: usize,
) -> Vec<Vec<u8>> {
    if regions <= 1 || max_handle <= min_handle {
        return Vec::new();
    }
    let span = i128::from(max_handle) - i128::from(min_handle) + 1;
    let mut handles = (1..regions as i128)
        .map(|idx| i128::from(min_handle) + span * idx / regions as i128)
        .filter(|handle| *handle > i128::from(min_handle) && *handle <= i128::from(max_handle))
        .map(|handle| handle as i64)
        .collect::<Vec<_>>();
    handles.dedup();
    handles
        .into_iter()
        .map(|handle| encode_record_key(table_id, handle))
        .collect()
}
