//! Decoded rows and the caller-owned output buffer.

use datafusion::common::ScalarValue;
use holo_kv::tablecodec::Handle;

use crate::error::{SampleError, SampleResult};

/// One sampled row; `cells` follow the column plan's output order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub handle: Handle,
    pub cells: Vec<ScalarValue>,
}

/// Fixed-capacity row buffer filled by one `next` call.
#[derive(Debug, Clone)]
pub struct RowBuffer {
    rows: Vec<Row>,
    capacity: usize,
}

impl RowBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.rows.len())
    }

    pub fn is_full(&self) -> bool {
        self.remaining_capacity() == 0
    }

    pub fn push(&mut self, row: Row) -> SampleResult<()> {
        if self.is_full() {
            return Err(SampleError::Internal(format!(
                "row buffer full at capacity {}",
                self.capacity
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.rows.iter().map(|row| row.handle).collect()
    }

    /// Empties the buffer, keeping its capacity for the next call.
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Drops rows past `len`; used to roll back a failed fill.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}
