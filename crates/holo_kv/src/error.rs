//! Error type shared by every HoloKV storage primitive.

use thiserror::Error;

/// Failures surfaced by stores, snapshots and iterators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    /// Hard I/O failure; retrying the same request will not help.
    #[error("storage io error: {0}")]
    Io(String),
    /// The request raced with a topology change (split, lease move) and may
    /// succeed when retried.
    #[error("transient storage error: {0}")]
    Transient(String),
    /// Shard-placement metadata could not be read.
    #[error("topology unavailable: {0}")]
    TopologyUnavailable(String),
    /// Stored bytes did not match the expected key or row layout.
    #[error("codec error: {0}")]
    Codec(String),
}

impl KvError {
    /// Returns `true` when the caller may retry under a backoff budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::TopologyUnavailable(_))
    }
}

pub type KvResult<T> = Result<T, KvError>;
