//! Region-aware table sampler.
//!
//! [`TableSampler`] returns at most one row per shard range of a table,
//! fanning the per-range reads out to a bounded set of fetcher tasks while
//! delivering rows in key order. Building blocks:
//! - [`RangeSplitter`]: table interval to shard-aligned ranges,
//! - [`ShardIterator`]: first record key of a range, with scan backoff,
//! - fetchers and an ordered syncer joined through synchronous handoff
//!   channels,
//! - [`ColumnPlan`] and [`RowDecoder`]: payload to [`Row`], generated
//!   columns included.

pub mod backoff;
pub mod config;
pub mod decoder;
pub mod error;
pub mod expr;
mod fetcher;
mod handoff;
pub mod iterator;
pub mod metrics;
pub mod plan;
pub mod row;
pub mod sampler;
pub mod splitter;
mod syncer;

pub use config::{ScanDirection, SamplerConfig};
pub use decoder::{RowDecoder, ScratchMap, TableRowDecoder};
pub use error::{SampleError, SampleResult};
pub use expr::{GeneratedExpr, ResolvedExpr};
pub use fetcher::RawRecord;
pub use iterator::ShardIterator;
pub use metrics::{SampleMetrics, SampleMetricsSnapshot};
pub use plan::{ColumnDef, ColumnPlan, OutputColumn, OutputSlot, SessionContext, TableSchema};
pub use row::{Row, RowBuffer};
pub use sampler::{CloseHandle, SamplerState, TableSampler};
pub use splitter::RangeSplitter;
