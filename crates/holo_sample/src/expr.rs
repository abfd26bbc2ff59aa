//! Generated-column expressions.
//!
//! A [`GeneratedExpr`] names columns; [`ResolvedExpr`] is the same tree after
//! name resolution against the full table schema, referencing column ids.
//! Evaluation only reads the decoded cells of one row.

use std::collections::HashMap;

use datafusion::common::ScalarValue;
use holo_kv::rowcodec::{ColumnId, ColumnType};
use holo_kv::tablecodec::Handle;

use crate::error::{SampleError, SampleResult};

/// Unresolved expression as written in the table definition.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedExpr {
    Column(String),
    Literal(ScalarValue),
    Add(Box<GeneratedExpr>, Box<GeneratedExpr>),
    Sub(Box<GeneratedExpr>, Box<GeneratedExpr>),
    Mul(Box<GeneratedExpr>, Box<GeneratedExpr>),
    /// String concatenation; `NULL` arguments are skipped.
    Concat(Vec<GeneratedExpr>),
    Upper(Box<GeneratedExpr>),
}

impl GeneratedExpr {
    pub fn col(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    pub fn lit(value: ScalarValue) -> Self {
        Self::Literal(value)
    }

    pub fn add(self, rhs: GeneratedExpr) -> Self {
        Self::Add(Box::new(self), Box::new(rhs))
    }

    pub fn sub(self, rhs: GeneratedExpr) -> Self {
        Self::Sub(Box::new(self), Box::new(rhs))
    }

    pub fn mul(self, rhs: GeneratedExpr) -> Self {
        Self::Mul(Box::new(self), Box::new(rhs))
    }

    pub fn upper(self) -> Self {
        Self::Upper(Box::new(self))
    }
}

/// Expression bound to column ids.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedExpr {
    Handle,
    Column(ColumnId),
    Literal(ScalarValue),
    Add(Box<ResolvedExpr>, Box<ResolvedExpr>),
    Sub(Box<ResolvedExpr>, Box<ResolvedExpr>),
    Mul(Box<ResolvedExpr>, Box<ResolvedExpr>),
    Concat(Vec<ResolvedExpr>),
    Upper(Box<ResolvedExpr>),
}

#[derive(Debug, Clone, Copy)]
enum ArithOp {
    Add,
    Sub,
    Mul,
}

impl ResolvedExpr {
    pub fn evaluate(
        &self,
        handle: Handle,
        cells: &HashMap<ColumnId, ScalarValue>,
    ) -> SampleResult<ScalarValue> {
        match self {
            Self::Handle => Ok(ScalarValue::Int64(Some(handle))),
            Self::Column(id) => cells.get(id).cloned().ok_or_else(|| {
                SampleError::Decode(format!("column id {id} missing from decoded row"))
            }),
            Self::Literal(value) => Ok(value.clone()),
            Self::Add(lhs, rhs) => arith(
                ArithOp::Add,
                lhs.evaluate(handle, cells)?,
                rhs.evaluate(handle, cells)?,
            ),
            Self::Sub(lhs, rhs) => arith(
                ArithOp::Sub,
                lhs.evaluate(handle, cells)?,
                rhs.evaluate(handle, cells)?,
            ),
            Self::Mul(lhs, rhs) => arith(
                ArithOp::Mul,
                lhs.evaluate(handle, cells)?,
                rhs.evaluate(handle, cells)?,
            ),
            Self::Concat(args) => {
                let mut out = String::new();
                for arg in args {
                    let value = arg.evaluate(handle, cells)?;
                    match value {
                        value if value.is_null() => {}
                        ScalarValue::Utf8(Some(text)) | ScalarValue::LargeUtf8(Some(text)) => {
                            out.push_str(&text)
                        }
                        other => out.push_str(&other.to_string()),
                    }
                }
                Ok(ScalarValue::Utf8(Some(out)))
            }
            Self::Upper(arg) => match arg.evaluate(handle, cells)? {
                ScalarValue::Utf8(Some(text)) | ScalarValue::LargeUtf8(Some(text)) => {
                    Ok(ScalarValue::Utf8(Some(text.to_uppercase())))
                }
                value if value.is_null() => Ok(ScalarValue::Utf8(None)),
                other => Err(SampleError::Decode(format!(
                    "upper() expects Utf8, got {}",
                    other.data_type()
                ))),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int(Option<i64>),
    Float(Option<f64>),
}

fn as_numeric(value: &ScalarValue) -> SampleResult<Numeric> {
    match value {
        ScalarValue::Int64(v) => Ok(Numeric::Int(*v)),
        ScalarValue::Int32(v) => Ok(Numeric::Int(v.map(i64::from))),
        ScalarValue::Float64(v) => Ok(Numeric::Float(*v)),
        ScalarValue::Null => Ok(Numeric::Int(None)),
        other => Err(SampleError::Decode(format!(
            "arithmetic on non-numeric value of type {}",
            other.data_type()
        ))),
    }
}

fn arith(op: ArithOp, lhs: ScalarValue, rhs: ScalarValue) -> SampleResult<ScalarValue> {
    match (as_numeric(&lhs)?, as_numeric(&rhs)?) {
        (Numeric::Int(lhs), Numeric::Int(rhs)) => {
            let (Some(lhs), Some(rhs)) = (lhs, rhs) else {
                return Ok(ScalarValue::Int64(None));
            };
            let result = match op {
                ArithOp::Add => lhs.checked_add(rhs),
                ArithOp::Sub => lhs.checked_sub(rhs),
                ArithOp::Mul => lhs.checked_mul(rhs),
            };
            result
                .map(|v| ScalarValue::Int64(Some(v)))
                .ok_or_else(|| SampleError::Decode(format!("integer overflow in {op:?}")))
        }
        (lhs, rhs) => {
            let (Some(lhs), Some(rhs)) = (as_f64(lhs), as_f64(rhs)) else {
                return Ok(ScalarValue::Float64(None));
            };
            let result = match op {
                ArithOp::Add => lhs + rhs,
                ArithOp::Sub => lhs - rhs,
                ArithOp::Mul => lhs * rhs,
            };
            Ok(ScalarValue::Float64(Some(result)))
        }
    }
}

fn as_f64(value: Numeric) -> Option<f64> {
    match value {
        Numeric::Int(v) => v.map(|v| v as f64),
        Numeric::Float(v) => v,
    }
}

/// Converts an evaluated cell to the declared column type.
pub(crate) fn coerce_to(column_type: ColumnType, value: ScalarValue) -> SampleResult<ScalarValue> {
    if value.is_null() {
        return Ok(column_type.null_value());
    }
    match (column_type, value) {
        (ColumnType::Int64, value @ ScalarValue::Int64(_)) => Ok(value),
        (ColumnType::Float64, value @ ScalarValue::Float64(_)) => Ok(value),
        (ColumnType::Float64, ScalarValue::Int64(Some(v))) => Ok(ScalarValue::Float64(Some(v as f64))),
        (ColumnType::Boolean, value @ ScalarValue::Boolean(_)) => Ok(value),
        (ColumnType::Utf8, value @ ScalarValue::Utf8(_)) => Ok(value),
        (ColumnType::Utf8, ScalarValue::LargeUtf8(v)) => Ok(ScalarValue::Utf8(v)),
        (ColumnType::TimestampNanosecond, value @ ScalarValue::TimestampNanosecond(_, _)) => {
            Ok(value)
        }
        (column_type, value) => Err(SampleError::Decode(format!(
            "generated value of type {} does not fit {column_type:?} column",
            value.data_type()
        ))),
    }
}
