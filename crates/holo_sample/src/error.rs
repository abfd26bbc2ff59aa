//! Errors surfaced at the sampler boundary.

use holo_kv::KvError;
use thiserror::Error;

/// Every failure a sampler can report. Cloneable so a failed sampler can hand
/// the same error back on every later call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleError {
    /// The topology has no shard for a non-empty table interval.
    #[error("no regions found for key range {range}")]
    TopologyEmpty { range: String },
    /// Shard placement could not be read within the lookup budget.
    #[error("topology unavailable: {0}")]
    TopologyUnavailable(String),
    #[error("storage io error: {0}")]
    StorageIo(String),
    /// Retryable storage errors kept failing past the scan backoff budget.
    #[error("storage timeout after {budget_ms}ms backoff: {last_error}")]
    StorageTimeout { budget_ms: u64, last_error: String },
    #[error("decode error: {0}")]
    Decode(String),
    /// Column plan could not be resolved against the table schema.
    #[error("plan error: {0}")]
    Plan(String),
    #[error("invalid sampler config: {0}")]
    Config(String),
    #[error("sampler cancelled")]
    Cancelled,
    #[error("internal sampler error: {0}")]
    Internal(String),
}

pub type SampleResult<T> = Result<T, SampleError>;

impl From<KvError> for SampleError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::Io(message) => Self::StorageIo(message),
            // Retryable kinds only reach this conversion once a backoff budget
            // has already been spent on them.
            KvError::Transient(message) => Self::StorageIo(message),
            KvError::TopologyUnavailable(message) => Self::TopologyUnavailable(message),
            KvError::Codec(message) => Self::Decode(message),
        }
    }
}
