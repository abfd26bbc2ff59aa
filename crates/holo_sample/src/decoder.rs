//! Turns a raw record into a [`Row`] following a [`ColumnPlan`].

use std::collections::HashMap;

use datafusion::common::ScalarValue;
use holo_kv::rowcodec::{self, ColumnId};
use holo_kv::tablecodec::Handle;

use crate::error::{SampleError, SampleResult};
use crate::expr::coerce_to;
use crate::plan::{ColumnPlan, OutputSlot, SessionContext};
use crate::row::Row;

/// Reusable map of decoded payload cells, keyed by column id.
pub type ScratchMap = HashMap<ColumnId, ScalarValue>;

/// Row decoding seam between the sampler and the table format.
///
/// Implementations fill `scratch` as they see fit; the caller clears it
/// after every row.
pub trait RowDecoder: Send + Sync {
    fn decode(
        &self,
        handle: Handle,
        value: &[u8],
        plan: &ColumnPlan,
        session: &SessionContext,
        scratch: &mut ScratchMap,
    ) -> SampleResult<Row>;
}

/// Decoder for `rowcodec` v2 payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableRowDecoder;

impl RowDecoder for TableRowDecoder {
    fn decode(
        &self,
        handle: Handle,
        value: &[u8],
        plan: &ColumnPlan,
        session: &SessionContext,
        scratch: &mut ScratchMap,
    ) -> SampleResult<Row> {
        rowcodec::decode_row_into(
            value,
            plan.stored_columns(),
            session.time_zone.as_ref(),
            scratch,
        )
        .map_err(|err| SampleError::Decode(format!("handle {handle}: {err}")))?;

        let mut cells = Vec::with_capacity(plan.len());
        for column in plan.outputs() {
            let cell = match &column.slot {
                OutputSlot::Handle => ScalarValue::Int64(Some(handle)),
                OutputSlot::Physical { id, column_type } => match scratch.get(id) {
                    Some(cell) => cell.clone(),
                    None => column_type.null_value(),
                },
                OutputSlot::Computed { expr, column_type } => {
                    coerce_to(*column_type, expr.evaluate(handle, scratch)?)?
                }
            };
            cells.push(cell);
        }
        Ok(Row { handle, cells })
    }
}
