//! Row value payloads.
//!
//! Layout (`v2`):
//! `version | flags | column_count u16 | null_bitmap_len u16 | null_bitmap |
//! (payload_len u32, payload)*` with one payload per non-null column, in
//! stored-column order. All integers are big-endian.

use std::collections::HashMap;
use std::sync::Arc;

use datafusion::common::ScalarValue;
use serde::{Deserialize, Serialize};

use crate::error::{KvError, KvResult};

const ROW_FORMAT_VERSION_V2: u8 = 2;

/// Stable column identifier within one table.
pub type ColumnId = u32;

/// Physical column encodings understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int64,
    Float64,
    Boolean,
    Utf8,
    TimestampNanosecond,
}

impl ColumnType {
    /// Typed SQL `NULL` for this column type.
    pub fn null_value(self) -> ScalarValue {
        match self {
            Self::Int64 => ScalarValue::Int64(None),
            Self::Float64 => ScalarValue::Float64(None),
            Self::Boolean => ScalarValue::Boolean(None),
            Self::Utf8 => ScalarValue::Utf8(None),
            Self::TimestampNanosecond => ScalarValue::TimestampNanosecond(None, None),
        }
    }
}

/// One column persisted in the row payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredColumn {
    pub id: ColumnId,
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

/// Encodes `values` (one per stored column) into a row payload.
pub fn encode_row(columns: &[StoredColumn], values: &[ScalarValue]) -> KvResult<Vec<u8>> {
    if columns.len() != values.len() {
        return Err(KvError::Codec(format!(
            "row value count mismatch: expected={}, got={}",
            columns.len(),
            values.len()
        )));
    }
    let column_count = u16::try_from(columns.len())
        .map_err(|_| KvError::Codec(format!("too many columns: {}", columns.len())))?;

    let mut payloads = Vec::with_capacity(columns.len());
    for (column, value) in columns.iter().zip(values) {
        payloads.push(encode_scalar_payload(value, column)?);
    }

    let null_bitmap_len = payloads.len().div_ceil(8);
    let mut null_bitmap = vec![0u8; null_bitmap_len];
    for (idx, payload) in payloads.iter().enumerate() {
        if payload.is_none() {
            null_bitmap[idx / 8] |= 1u8 << (idx % 8);
        }
    }

    let mut out = Vec::new();
    out.push(ROW_FORMAT_VERSION_V2);
    out.push(0);
    out.extend_from_slice(&column_count.to_be_bytes());
    out.extend_from_slice(&(null_bitmap_len as u16).to_be_bytes());
    out.extend_from_slice(&null_bitmap);
    for payload in payloads.into_iter().flatten() {
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload);
    }
    Ok(out)
}

/// Decodes a row payload into `out`, keyed by column id. Timestamp cells
/// carry `time_zone`.
pub fn decode_row_into(
    bytes: &[u8],
    columns: &[StoredColumn],
    time_zone: Option<&Arc<str>>,
    out: &mut HashMap<ColumnId, ScalarValue>,
) -> KvResult<()> {
    if bytes.len() < 2 {
        return Err(KvError::Codec("row value too short".to_string()));
    }
    if bytes[0] != ROW_FORMAT_VERSION_V2 {
        return Err(KvError::Codec(format!(
            "unsupported row format version {}",
            bytes[0]
        )));
    }
    if bytes[1] != 0 {
        return Err(KvError::Codec(format!("unsupported row flags {:#04x}", bytes[1])));
    }

    let mut cursor = 2usize;
    let column_count = read_u16(bytes, &mut cursor)? as usize;
    if column_count != columns.len() {
        return Err(KvError::Codec(format!(
            "row payload column count mismatch: expected={}, got={}",
            columns.len(),
            column_count
        )));
    }
    let null_bitmap_len = read_u16(bytes, &mut cursor)? as usize;
    if bytes.len() < cursor + null_bitmap_len {
        return Err(KvError::Codec("row null bitmap truncated".to_string()));
    }
    let null_bitmap = &bytes[cursor..cursor + null_bitmap_len];
    cursor += null_bitmap_len;

    for (idx, column) in columns.iter().enumerate() {
        let value = if is_null(null_bitmap, idx) {
            if !column.nullable {
                return Err(KvError::Codec(format!(
                    "missing non-nullable payload for column '{}'",
                    column.name
                )));
            }
            column.column_type.null_value()
        } else {
            let payload_len = read_u32(bytes, &mut cursor)? as usize;
            if bytes.len() < cursor + payload_len {
                return Err(KvError::Codec(format!(
                    "row payload truncated in column '{}'",
                    column.name
                )));
            }
            let payload = &bytes[cursor..cursor + payload_len];
            cursor += payload_len;
            decode_scalar_payload(payload, column, time_zone)?
        };
        out.insert(column.id, value);
    }
    Ok(())
}

fn encode_scalar_payload(value: &ScalarValue, column: &StoredColumn) -> KvResult<Option<Vec<u8>>> {
    if value.is_null() {
        if !column.nullable {
            return Err(KvError::Codec(format!(
                "null value violates not-null constraint for column '{}'",
                column.name
            )));
        }
        return Ok(None);
    }

    let mismatch = || {
        KvError::Codec(format!(
            "invalid value type {} for {:?} column '{}'",
            value.data_type(),
            column.column_type,
            column.name
        ))
    };
    let payload = match (column.column_type, value) {
        (ColumnType::Int64, ScalarValue::Int64(Some(v))) => v.to_be_bytes().to_vec(),
        (ColumnType::Int64, ScalarValue::Int32(Some(v))) => i64::from(*v).to_be_bytes().to_vec(),
        (ColumnType::Float64, ScalarValue::Float64(Some(v))) => v.to_be_bytes().to_vec(),
        (ColumnType::Float64, ScalarValue::Int64(Some(v))) => (*v as f64).to_be_bytes().to_vec(),
        (ColumnType::Boolean, ScalarValue::Boolean(Some(v))) => vec![u8::from(*v)],
        (ColumnType::Utf8, ScalarValue::Utf8(Some(v)))
        | (ColumnType::Utf8, ScalarValue::LargeUtf8(Some(v))) => v.as_bytes().to_vec(),
        (ColumnType::TimestampNanosecond, ScalarValue::TimestampNanosecond(Some(v), _)) => {
            v.to_be_bytes().to_vec()
        }
        _ => return Err(mismatch()),
    };
    Ok(Some(payload))
}

fn decode_scalar_payload(
    payload: &[u8],
    column: &StoredColumn,
    time_zone: Option<&Arc<str>>,
) -> KvResult<ScalarValue> {
    let fixed8 = |payload: &[u8]| -> KvResult<[u8; 8]> {
        payload.try_into().map_err(|_| {
            KvError::Codec(format!(
                "invalid {:?} payload length {} for '{}'",
                column.column_type,
                payload.len(),
                column.name
            ))
        })
    };
    match column.column_type {
        ColumnType::Int64 => Ok(ScalarValue::Int64(Some(i64::from_be_bytes(fixed8(payload)?)))),
        ColumnType::Float64 => Ok(ScalarValue::Float64(Some(f64::from_be_bytes(fixed8(
            payload,
        )?)))),
        ColumnType::Boolean => {
            if payload.len() != 1 {
                return Err(KvError::Codec(format!(
                    "invalid Boolean payload length for '{}'",
                    column.name
                )));
            }
            Ok(ScalarValue::Boolean(Some(payload[0] != 0)))
        }
        ColumnType::Utf8 => {
            let value = std::str::from_utf8(payload).map_err(|err| {
                KvError::Codec(format!("invalid Utf8 payload for '{}': {err}", column.name))
            })?;
            Ok(ScalarValue::Utf8(Some(value.to_string())))
        }
        ColumnType::TimestampNanosecond => Ok(ScalarValue::TimestampNanosecond(
            Some(i64::from_be_bytes(fixed8(payload)?)),
            time_zone.cloned(),
        )),
    }
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> KvResult<u16> {
    if bytes.len() < *cursor + 2 {
        return Err(KvError::Codec(
            "buffer underflow while decoding u16".to_string(),
        ));
    }
    let mut out = [0u8; 2];
    out.copy_from_slice(&bytes[*cursor..*cursor + 2]);
    *cursor += 2;
    Ok(u16::from_be_bytes(out))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> KvResult<u32> {
    if bytes.len() < *cursor + 4 {
        return Err(KvError::Codec(
            "buffer underflow while decoding u32".to_string(),
        ));
    }
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[*cursor..*cursor + 4]);
    *cursor += 4;
    Ok(u32::from_be_bytes(out))
}

fn is_null(bitmap: &[u8], column_idx: usize) -> bool {
    let byte_idx = column_idx / 8;
    if byte_idx >= bitmap.len() {
        return false;
    }
    (bitmap[byte_idx] & (1u8 << (column_idx % 8))) != 0
}
