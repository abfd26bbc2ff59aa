//! Shared helpers for sampler integration tests.
//!
//! [`FaultyStore`] wraps any [`Store`] and injects the storage failures the
//! sampler must survive or surface: hard I/O errors on one range, transient
//! errors on open/advance, unavailable or empty topology, and opens that
//! never complete.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use datafusion::common::ScalarValue;
use holo_kv::rowcodec::{encode_row, ColumnType};
use holo_kv::tablecodec::{encode_index_key, encode_meta_key, encode_record_key, Handle};
use holo_kv::{KeyRange, KvError, KvIterator, KvResult, ShardedStore, Snapshot, Store, Timestamp};
use holo_sample::{
    ColumnDef, GeneratedExpr, RowBuffer, SampleResult, SamplerConfig, TableSampler, TableSchema,
};
use tokio::sync::Notify;

pub const TABLE_ID: u64 = 100;
/// Commit timestamp of seeded rows.
pub const SEED_TS: Timestamp = 1;
/// Read timestamp used by samplers unless a test says otherwise.
pub const READ_TS: Timestamp = 10;

/// `id` is the handle; `label` is derived from `name` and `id`.
pub fn schema() -> TableSchema {
    TableSchema::new(
        TABLE_ID,
        vec![
            ColumnDef::new(1, "id", ColumnType::Int64).not_null(),
            ColumnDef::new(2, "name", ColumnType::Utf8),
            ColumnDef::new(3, "score", ColumnType::Float64),
            ColumnDef::new(4, "label", ColumnType::Utf8).generated(GeneratedExpr::Concat(vec![
                GeneratedExpr::col("name").upper(),
                GeneratedExpr::lit(ScalarValue::Utf8(Some(":".into()))),
                GeneratedExpr::col("id"),
            ])),
        ],
    )
    .with_handle_column("id")
}

pub fn row_payload(handle: Handle) -> Vec<u8> {
    encode_row(
        &schema().stored_columns(),
        &[
            ScalarValue::Utf8(Some(format!("row{handle}"))),
            ScalarValue::Float64(Some(handle as f64 / 2.0)),
        ],
    )
    .expect("encode row")
}

/// Sharded table split before each handle in `splits`, holding `rows`.
///
/// A metadata key precedes the records and index entries follow them, so
/// the first and last ranges also hold non-record keys.
pub fn sharded_table(splits: &[Handle], rows: &[Handle]) -> Arc<ShardedStore> {
    let store = ShardedStore::single_shard();
    let split_keys = splits
        .iter()
        .map(|handle| encode_record_key(TABLE_ID, *handle))
        .collect::<Vec<_>>();
    store.split_keys(&split_keys).expect("split table");

    let mut batch = vec![(
        encode_meta_key(TABLE_ID, b"auto_increment"),
        Some(b"1000".to_vec()),
    )];
    for handle in rows {
        batch.push((encode_record_key(TABLE_ID, *handle), Some(row_payload(*handle))));
        batch.push((
            encode_index_key(TABLE_ID, 1, format!("row{handle}").as_bytes()),
            Some(handle.to_be_bytes().to_vec()),
        ));
    }
    store.write_batch(batch, SEED_TS).expect("seed table");
    Arc::new(store)
}

pub fn sampler(store: Arc<dyn Store>, config: SamplerConfig) -> TableSampler {
    TableSampler::new(store, &schema(), &["id", "name", "label"], READ_TS, config)
        .expect("resolve sampler plan")
}

/// Calls `next` with fresh buffers of `capacity` until the sampler finishes.
pub async fn drain(sampler: &mut TableSampler, capacity: usize) -> SampleResult<Vec<Handle>> {
    let mut handles = Vec::new();
    while !sampler.finished() {
        let mut buf = RowBuffer::with_capacity(capacity);
        sampler.next(&mut buf).await?;
        assert!(buf.len() <= capacity);
        handles.extend(buf.handles());
    }
    Ok(handles)
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Failure knobs shared between a [`FaultyStore`] and the test body.
#[derive(Default)]
pub struct Faults {
    /// Opening a range that starts at this key fails with this error.
    fail_open: Mutex<Option<(Vec<u8>, KvError)>>,
    /// The next open of a range starting at this key never completes.
    hang_open: Mutex<Option<Vec<u8>>>,
    transient_opens: AtomicUsize,
    transient_advances: AtomicUsize,
    unavailable_lookups: AtomicUsize,
    empty_topology: AtomicBool,
    /// Notified each time an open starts hanging.
    pub hung: Notify,
    pub opens: AtomicUsize,
    pub lookups: AtomicUsize,
}

impl Faults {
    pub fn fail_open_at(&self, start_key: Vec<u8>, err: KvError) {
        *self.fail_open.lock().unwrap() = Some((start_key, err));
    }

    pub fn hang_open_at(&self, start_key: Vec<u8>) {
        *self.hang_open.lock().unwrap() = Some(start_key);
    }

    pub fn transient_opens(&self, count: usize) {
        self.transient_opens.store(count, Ordering::SeqCst);
    }

    pub fn transient_advances(&self, count: usize) {
        self.transient_advances.store(count, Ordering::SeqCst);
    }

    pub fn unavailable_lookups(&self, count: usize) {
        self.unavailable_lookups.store(count, Ordering::SeqCst);
    }

    pub fn empty_topology(&self) {
        self.empty_topology.store(true, Ordering::SeqCst);
    }
}

pub struct FaultyStore {
    inner: Arc<dyn Store>,
    faults: Arc<Faults>,
}

impl FaultyStore {
    pub fn wrap(inner: Arc<dyn Store>) -> (Arc<Self>, Arc<Faults>) {
        let faults = Arc::new(Faults::default());
        let store = Arc::new(Self {
            inner,
            faults: Arc::clone(&faults),
        });
        (store, faults)
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn shards_overlapping(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> KvResult<Vec<KeyRange>> {
        self.faults.lookups.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.faults.unavailable_lookups) {
            return Err(KvError::TopologyUnavailable("placement driver unreachable".into()));
        }
        if self.faults.empty_topology.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.inner.shards_overlapping(start_key, end_key).await
    }

    async fn snapshot_at(&self, read_ts: Timestamp) -> KvResult<Arc<dyn Snapshot>> {
        let inner = self.inner.snapshot_at(read_ts).await?;
        Ok(Arc::new(FaultySnapshot {
            inner,
            faults: Arc::clone(&self.faults),
        }))
    }

    fn is_sharded(&self) -> bool {
        self.inner.is_sharded()
    }
}

struct FaultySnapshot {
    inner: Arc<dyn Snapshot>,
    faults: Arc<Faults>,
}

#[async_trait]
impl Snapshot for FaultySnapshot {
    fn read_ts(&self) -> Timestamp {
        self.inner.read_ts()
    }

    async fn iterate(&self, range: &KeyRange) -> KvResult<Box<dyn KvIterator>> {
        self.faults.opens.fetch_add(1, Ordering::SeqCst);
        let hang = {
            let mut slot = self.faults.hang_open.lock().unwrap();
            let hit = slot.as_deref() == Some(&range.start_key[..]);
            if hit {
                slot.take();
            }
            hit
        };
        if hang {
            self.faults.hung.notify_one();
            std::future::pending::<()>().await;
        }
        let failure = match self.faults.fail_open.lock().unwrap().as_ref() {
            Some((start_key, err)) if *start_key == range.start_key => Some(err.clone()),
            _ => None,
        };
        if let Some(err) = failure {
            return Err(err);
        }
        if take_one(&self.faults.transient_opens) {
            return Err(KvError::Transient("shard epoch changed".into()));
        }
        let inner = self.inner.iterate(range).await?;
        Ok(Box::new(FaultyIterator {
            inner,
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct FaultyIterator {
    inner: Box<dyn KvIterator>,
    faults: Arc<Faults>,
}

#[async_trait]
impl KvIterator for FaultyIterator {
    fn valid(&self) -> bool {
        self.inner.valid()
    }

    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    async fn advance(&mut self) -> KvResult<()> {
        if take_one(&self.faults.transient_advances) {
            return Err(KvError::Transient("shard moved".into()));
        }
        self.inner.advance().await
    }
}
