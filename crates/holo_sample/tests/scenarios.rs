//! End-to-end sampling over a sharded in-memory table.

mod common;

use std::sync::Arc;

use datafusion::common::ScalarValue;
use holo_kv::tablecodec::{encode_record_key, table_prefix};
use holo_kv::{KvError, LocalStore, Store};
use holo_sample::{RowBuffer, SampleError, SamplerConfig, SamplerState, ScanDirection, SessionContext};

use common::{drain, sampler, sharded_table, FaultyStore, READ_TS, SEED_TS, TABLE_ID};

#[tokio::test]
async fn three_ranges_in_one_call() {
    let store = sharded_table(&[15, 25], &[10, 20, 30]);
    let mut sampler = sampler(store, SamplerConfig::default());

    let mut buf = RowBuffer::with_capacity(10);
    sampler.next(&mut buf).await.unwrap();
    assert_eq!(buf.handles(), vec![10, 20, 30]);
    assert!(sampler.finished());
    assert_eq!(sampler.live_fetchers(), 0);

    let first = &buf.rows()[0];
    assert_eq!(
        first.cells,
        vec![
            ScalarValue::Int64(Some(10)),
            ScalarValue::Utf8(Some("row10".into())),
            ScalarValue::Utf8(Some("ROW10:10".into())),
        ]
    );
}

#[tokio::test]
async fn small_buffer_resumes_on_next_call() {
    let store = sharded_table(&[15, 25], &[10, 20, 30]);
    let mut sampler = sampler(store, SamplerConfig::default());

    let mut first = RowBuffer::with_capacity(2);
    sampler.next(&mut first).await.unwrap();
    assert_eq!(first.handles(), vec![10, 20]);
    assert!(!sampler.finished());
    assert_eq!(sampler.pending_ranges(), 1);

    let mut second = RowBuffer::with_capacity(10);
    sampler.next(&mut second).await.unwrap();
    assert_eq!(second.handles(), vec![30]);
    assert!(sampler.finished());
}

#[tokio::test]
async fn empty_range_contributes_no_row() {
    let store = sharded_table(&[8, 12, 20], &[5, 15, 25]);
    let mut sampler = sampler(store, SamplerConfig::default().with_concurrency(2));

    let mut buf = RowBuffer::with_capacity(10);
    sampler.next(&mut buf).await.unwrap();
    assert_eq!(buf.handles(), vec![5, 15, 25]);
    assert!(sampler.finished());

    let metrics = sampler.metrics().snapshot();
    assert_eq!(metrics.ranges_scanned, 4);
    assert_eq!(metrics.empty_ranges, 1);
    assert_eq!(metrics.rows_emitted, 3);
    assert_eq!(metrics.peak_workers, 2);
}

#[tokio::test]
async fn reverse_direction_emits_descending_handles() {
    let store = sharded_table(&[15, 25], &[10, 20, 30]);
    let config = SamplerConfig::default().with_direction(ScanDirection::Reverse);
    let mut sampler = sampler(store, config);

    let mut buf = RowBuffer::with_capacity(10);
    sampler.next(&mut buf).await.unwrap();
    assert_eq!(buf.handles(), vec![30, 20, 10]);
    assert!(sampler.finished());
}

#[tokio::test]
async fn storage_error_fails_the_sampler() {
    let (store, faults) = FaultyStore::wrap(sharded_table(&[15, 25], &[10, 20, 30]));
    faults.fail_open_at(encode_record_key(TABLE_ID, 15), KvError::Io("e".into()));
    let mut sampler = sampler(store, SamplerConfig::default());

    let mut buf = RowBuffer::with_capacity(10);
    let err = sampler.next(&mut buf).await.unwrap_err();
    assert_eq!(err, SampleError::StorageIo("e".into()));
    assert!(buf.is_empty());
    assert_eq!(sampler.state(), &SamplerState::Failed(err.clone()));
    assert_eq!(sampler.live_fetchers(), 0);

    let mut again = RowBuffer::with_capacity(10);
    assert_eq!(sampler.next(&mut again).await.unwrap_err(), err);
    assert!(again.is_empty());
    let metrics = sampler.metrics().snapshot();
    assert_eq!(metrics.fetcher_errors, 1);
    // Row 10 was decoded before the failure but never handed out.
    assert_eq!(metrics.rows_emitted, 0);
}

#[tokio::test]
async fn error_on_first_range_surfaces_on_same_call() {
    let (store, faults) = FaultyStore::wrap(sharded_table(&[15, 25], &[10, 20, 30]));
    faults.fail_open_at(table_prefix(TABLE_ID), KvError::Io("disk gone".into()));
    let mut sampler = sampler(store, SamplerConfig::default().with_concurrency(1));

    let mut buf = RowBuffer::with_capacity(10);
    let err = sampler.next(&mut buf).await.unwrap_err();
    assert_eq!(err, SampleError::StorageIo("disk gone".into()));
    assert!(buf.is_empty());
    assert_eq!(sampler.live_fetchers(), 0);
}

#[tokio::test]
async fn hundred_ranges_stay_ordered_under_concurrency() {
    let splits = (2..=100).collect::<Vec<_>>();
    let rows = (1..=100).collect::<Vec<_>>();
    let store = sharded_table(&splits, &rows);
    let mut sampler = sampler(store, SamplerConfig::default().with_concurrency(8));

    let mut buf = RowBuffer::with_capacity(100);
    sampler.next(&mut buf).await.unwrap();
    assert_eq!(buf.handles(), rows);
    assert!(sampler.finished());
    assert_eq!(sampler.metrics().snapshot().peak_workers, 8);
}

#[tokio::test]
async fn table_without_records_finishes_cleanly() {
    let store = sharded_table(&[15, 25], &[]);
    let mut sampler = sampler(store, SamplerConfig::default());

    let mut buf = RowBuffer::with_capacity(10);
    sampler.next(&mut buf).await.unwrap();
    assert!(buf.is_empty());
    assert!(sampler.finished());
    assert_eq!(sampler.metrics().snapshot().empty_ranges, 3);
}

#[tokio::test]
async fn single_shard_uses_one_fetcher() {
    let store = sharded_table(&[], &[3, 4, 5]);
    let mut sampler = sampler(store, SamplerConfig::default().with_concurrency(16));

    let mut buf = RowBuffer::with_capacity(10);
    sampler.next(&mut buf).await.unwrap();
    assert_eq!(buf.handles(), vec![3]);
    assert_eq!(sampler.metrics().snapshot().peak_workers, 1);
}

#[tokio::test]
async fn local_store_samples_first_record() {
    let store = LocalStore::new();
    for handle in [7, 9] {
        store
            .put(
                encode_record_key(TABLE_ID, handle),
                common::row_payload(handle),
                SEED_TS,
            )
            .unwrap();
    }
    let mut sampler = sampler(Arc::new(store), SamplerConfig::default());
    assert_eq!(drain(&mut sampler, 4).await.unwrap(), vec![7]);
}

#[tokio::test]
async fn buffer_smaller_than_concurrency_caps_fetchers() {
    let store = sharded_table(&[15, 25], &[10, 20, 30]);
    let mut sampler = sampler(store, SamplerConfig::default().with_concurrency(8));

    assert_eq!(drain(&mut sampler, 1).await.unwrap(), vec![10, 20, 30]);
    let metrics = sampler.metrics().snapshot();
    assert_eq!(metrics.batches, 3);
    assert_eq!(metrics.peak_workers, 1);
}

#[tokio::test]
async fn non_positive_concurrency_still_makes_progress() {
    let store = sharded_table(&[15, 25], &[10, 20, 30]);
    let mut sampler = sampler(store, SamplerConfig::default().with_concurrency(-3));
    assert_eq!(drain(&mut sampler, 10).await.unwrap(), vec![10, 20, 30]);
    assert_eq!(sampler.metrics().snapshot().peak_workers, 1);
}

#[tokio::test]
async fn finished_sampler_leaves_buffer_untouched() {
    let store = sharded_table(&[15, 25], &[10, 20, 30]);
    let mut sampler = sampler(store, SamplerConfig::default());
    drain(&mut sampler, 10).await.unwrap();

    let mut buf = RowBuffer::with_capacity(4);
    sampler.next(&mut buf).await.unwrap();
    sampler.next(&mut buf).await.unwrap();
    assert!(buf.is_empty());
    assert!(sampler.finished());
}

#[tokio::test]
async fn snapshot_hides_later_deletes() {
    let store = sharded_table(&[15, 25], &[10, 20, 30]);
    store.delete(encode_record_key(TABLE_ID, 20), READ_TS + 5).unwrap();
    store.delete(encode_record_key(TABLE_ID, 30), READ_TS - 1).unwrap();

    let mut sampler = sampler(store, SamplerConfig::default());
    assert_eq!(drain(&mut sampler, 10).await.unwrap(), vec![10, 20]);
}

#[tokio::test]
async fn partitions_are_sampled_in_key_order() {
    let store = holo_kv::ShardedStore::single_shard();
    for (partition, handle) in [(201_u64, 1_i64), (202, 2), (203, 3)] {
        store
            .put(
                encode_record_key(partition, handle),
                common::row_payload(handle),
                SEED_TS,
            )
            .unwrap();
    }
    let schema = common::schema().with_partitions(vec![203, 201, 202]);
    let mut sampler = holo_sample::TableSampler::new(
        Arc::new(store),
        &schema,
        &["id"],
        READ_TS,
        SamplerConfig::default(),
    )
    .unwrap();
    assert_eq!(drain(&mut sampler, 10).await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn projection_follows_requested_order() {
    let store = sharded_table(&[15, 25], &[10, 20, 30]);
    let mut sampler = holo_sample::TableSampler::new(
        store,
        &common::schema(),
        &["label", "score"],
        READ_TS,
        SamplerConfig::default(),
    )
    .unwrap()
    .with_session(SessionContext::with_time_zone("+08:00"));
    assert_eq!(sampler.plan().output_names(), vec!["label", "score"]);

    let mut buf = RowBuffer::with_capacity(1);
    sampler.next(&mut buf).await.unwrap();
    assert_eq!(
        buf.rows()[0].cells,
        vec![
            ScalarValue::Utf8(Some("ROW10:10".into())),
            ScalarValue::Float64(Some(5.0)),
        ]
    );
}

#[tokio::test]
async fn decode_error_fails_the_sampler() {
    let store = sharded_table(&[15, 25], &[10, 30]);
    store
        .put(encode_record_key(TABLE_ID, 20), b"garbage".to_vec(), SEED_TS)
        .unwrap();
    let mut sampler = sampler(store, SamplerConfig::default());

    let mut buf = RowBuffer::with_capacity(10);
    let err = sampler.next(&mut buf).await.unwrap_err();
    assert!(matches!(err, SampleError::Decode(_)), "{err}");
    assert!(buf.is_empty());
    assert!(matches!(sampler.state(), SamplerState::Failed(_)));
    assert_eq!(sampler.live_fetchers(), 0);
}

#[tokio::test]
async fn store_trait_object_is_accepted() {
    let store: Arc<dyn Store> = sharded_table(&[15], &[10, 20]);
    let mut sampler = sampler(store, SamplerConfig::default());
    assert_eq!(drain(&mut sampler, 10).await.unwrap(), vec![10, 20]);
}
