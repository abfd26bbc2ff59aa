//! Ordering and completeness properties over random tables.

mod common;

use holo_kv::tablecodec::Handle;
use holo_sample::{SamplerConfig, ScanDirection};
use proptest::prelude::*;

use common::{drain, sampler, sharded_table};

/// Ten handles per range: range `i` owns handles `[i * 10, i * 10 + 10)`.
const RANGE_WIDTH: i64 = 10;

#[derive(Debug, Clone)]
struct Table {
    /// Handle offsets present in each range.
    ranges: Vec<Vec<i64>>,
}

impl Table {
    fn splits(&self) -> Vec<Handle> {
        (1..self.ranges.len() as i64).map(|idx| idx * RANGE_WIDTH).collect()
    }

    fn rows(&self) -> Vec<Handle> {
        self.ranges
            .iter()
            .enumerate()
            .flat_map(|(idx, offsets)| {
                offsets
                    .iter()
                    .map(move |offset| idx as i64 * RANGE_WIDTH + offset)
            })
            .collect()
    }

    /// What a single-threaded scan emits: the lowest handle of each
    /// non-empty range, in range order for `direction`.
    fn expected(&self, direction: ScanDirection) -> Vec<Handle> {
        let mut firsts = self
            .ranges
            .iter()
            .enumerate()
            .filter_map(|(idx, offsets)| {
                offsets
                    .iter()
                    .min()
                    .map(|offset| idx as i64 * RANGE_WIDTH + offset)
            })
            .collect::<Vec<_>>();
        if direction.is_reverse() {
            firsts.reverse();
        }
        firsts
    }
}

fn table() -> impl Strategy<Value = Table> {
    prop::collection::vec(
        prop::collection::btree_set(1..RANGE_WIDTH, 0..4)
            .prop_map(|offsets| offsets.into_iter().collect::<Vec<_>>()),
        1..24,
    )
    .prop_map(|ranges| Table { ranges })
}

fn direction() -> impl Strategy<Value = ScanDirection> {
    prop_oneof![Just(ScanDirection::Forward), Just(ScanDirection::Reverse)]
}

fn run(table: &Table, direction: ScanDirection, concurrency: i64, capacity: usize) -> Vec<Handle> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let store = sharded_table(&table.splits(), &table.rows());
        let config = SamplerConfig::default()
            .with_concurrency(concurrency)
            .with_direction(direction);
        let mut sampler = sampler(store, config);
        let handles = drain(&mut sampler, capacity).await.expect("sample table");
        assert_eq!(sampler.live_fetchers(), 0);
        handles
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn matches_sequential_scan(
        table in table(),
        direction in direction(),
        concurrency in 1i64..9,
        capacity in 1usize..12,
    ) {
        prop_assert_eq!(run(&table, direction, concurrency, capacity), table.expected(direction));
    }

    #[test]
    fn concurrency_does_not_change_output(
        table in table(),
        direction in direction(),
        concurrency in 2i64..16,
    ) {
        let sequential = run(&table, direction, 1, usize::MAX);
        prop_assert_eq!(run(&table, direction, concurrency, usize::MAX), sequential);
    }

    #[test]
    fn unit_buffers_match_one_large_buffer(table in table(), concurrency in 1i64..6) {
        let whole = run(&table, ScanDirection::Forward, concurrency, usize::MAX);
        let piecewise = run(&table, ScanDirection::Forward, concurrency, 1);
        prop_assert_eq!(piecewise, whole);
    }

    #[test]
    fn at_most_one_row_per_range(table in table(), capacity in 1usize..30) {
        let handles = run(&table, ScanDirection::Forward, 4, capacity);
        prop_assert!(handles.len() <= table.ranges.len());
        let mut owners = handles
            .iter()
            .map(|handle| handle / RANGE_WIDTH)
            .collect::<Vec<_>>();
        owners.dedup();
        prop_assert_eq!(owners.len(), handles.len());
    }
}
