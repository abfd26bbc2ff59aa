//! HoloKV storage primitives used by the sampling executor.
//!
//! The crate provides:
//! - an in-memory MVCC engine with snapshot reads,
//! - two store variants behind one capability set ([`Store`]): a single-node
//!   [`LocalStore`] and a range-sharded [`ShardedStore`] with splits,
//! - the table key layout ([`tablecodec`]) and row payload codec
//!   ([`rowcodec`]).

pub mod engine;
pub mod error;
pub mod local;
pub mod range;
pub mod rowcodec;
pub mod sharded;
pub mod store;
pub mod tablecodec;
pub mod topology;

pub use engine::{MemEngine, Timestamp};
pub use error::{KvError, KvResult};
pub use local::LocalStore;
pub use range::KeyRange;
pub use sharded::ShardedStore;
pub use store::{KvIterator, Snapshot, Store};
pub use topology::{ClusterTopology, TopologyShard};
