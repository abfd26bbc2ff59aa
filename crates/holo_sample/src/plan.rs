//! Table schema and the per-query column plan.
//!
//! The plan is resolved once, before any row is decoded. Generated columns
//! are bound against the full table schema even when the query only asks
//! for the generated column itself, so the decoder always has every input
//! the expression reads.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use holo_kv::rowcodec::{ColumnId, ColumnType, StoredColumn};

use crate::error::{SampleError, SampleResult};
use crate::expr::{GeneratedExpr, ResolvedExpr};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub id: ColumnId,
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Expression for virtual columns. Virtual columns are never stored.
    pub generated: Option<GeneratedExpr>,
}

impl ColumnDef {
    pub fn new(id: ColumnId, name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            id,
            name: name.into(),
            column_type,
            nullable: true,
            generated: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn generated(mut self, expr: GeneratedExpr) -> Self {
        self.generated = Some(expr);
        self
    }

    pub fn is_generated(&self) -> bool {
        self.generated.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub table_id: u64,
    /// Physical partitions; empty means the table is stored under its own id.
    pub partition_ids: Vec<u64>,
    pub columns: Vec<ColumnDef>,
    /// Column whose value is the row handle rather than a payload cell.
    pub handle_column: Option<String>,
}

impl TableSchema {
    pub fn new(table_id: u64, columns: Vec<ColumnDef>) -> Self {
        Self {
            table_id,
            partition_ids: Vec::new(),
            columns,
            handle_column: None,
        }
    }

    pub fn with_handle_column(mut self, name: impl Into<String>) -> Self {
        self.handle_column = Some(name.into());
        self
    }

    pub fn with_partitions(mut self, partition_ids: Vec<u64>) -> Self {
        self.partition_ids = partition_ids;
        self
    }

    /// Ids whose key prefixes hold the table's rows.
    pub fn physical_ids(&self) -> Vec<u64> {
        if self.partition_ids.is_empty() {
            vec![self.table_id]
        } else {
            self.partition_ids.clone()
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    fn is_handle_column(&self, name: &str) -> bool {
        self.handle_column.as_deref() == Some(name)
    }

    /// Columns present in the row payload, in payload order.
    pub fn stored_columns(&self) -> Vec<StoredColumn> {
        self.columns
            .iter()
            .filter(|column| !column.is_generated() && !self.is_handle_column(&column.name))
            .map(|column| StoredColumn {
                id: column.id,
                name: column.name.clone(),
                column_type: column.column_type,
                nullable: column.nullable,
            })
            .collect()
    }

    pub fn validate(&self) -> SampleResult<()> {
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for column in &self.columns {
            if !names.insert(column.name.as_str()) {
                return Err(SampleError::Plan(format!(
                    "duplicate column name '{}' in table {}",
                    column.name, self.table_id
                )));
            }
            if !ids.insert(column.id) {
                return Err(SampleError::Plan(format!(
                    "duplicate column id {} in table {}",
                    column.id, self.table_id
                )));
            }
        }
        if let Some(handle) = self.handle_column.as_deref() {
            let column = self.column(handle).ok_or_else(|| {
                SampleError::Plan(format!("unknown handle column '{handle}'"))
            })?;
            if column.column_type != ColumnType::Int64 || column.is_generated() {
                return Err(SampleError::Plan(format!(
                    "handle column '{handle}' must be a stored Int64 column"
                )));
            }
        }
        Ok(())
    }
}

/// Where one output cell comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSlot {
    Handle,
    Physical { id: ColumnId, column_type: ColumnType },
    Computed { expr: ResolvedExpr, column_type: ColumnType },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub name: String,
    pub slot: OutputSlot,
}

/// Immutable per-query decode plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    table_id: u64,
    stored: Vec<StoredColumn>,
    outputs: Vec<OutputColumn>,
}

impl ColumnPlan {
    /// Resolves `requested` column names, in order, against `schema`.
    pub fn resolve(schema: &TableSchema, requested: &[&str]) -> SampleResult<Self> {
        schema.validate()?;
        let mut resolver = Resolver {
            schema,
            by_name: schema
                .columns
                .iter()
                .map(|column| (column.name.as_str(), column))
                .collect(),
            visiting: Vec::new(),
        };

        let mut outputs = Vec::with_capacity(requested.len());
        for name in requested {
            let column = resolver.lookup(name)?;
            let slot = if schema.is_handle_column(name) {
                OutputSlot::Handle
            } else if let Some(expr) = &column.generated {
                resolver.visiting.push(column.name.clone());
                let expr = resolver.bind(expr)?;
                resolver.visiting.clear();
                OutputSlot::Computed {
                    expr,
                    column_type: column.column_type,
                }
            } else {
                OutputSlot::Physical {
                    id: column.id,
                    column_type: column.column_type,
                }
            };
            outputs.push(OutputColumn {
                name: column.name.clone(),
                slot,
            });
        }

        Ok(Self {
            table_id: schema.table_id,
            stored: schema.stored_columns(),
            outputs,
        })
    }

    /// Plan over every column of the schema, in declaration order.
    pub fn all_columns(schema: &TableSchema) -> SampleResult<Self> {
        let names = schema
            .columns
            .iter()
            .map(|column| column.name.as_str())
            .collect::<Vec<_>>();
        Self::resolve(schema, &names)
    }

    pub fn table_id(&self) -> u64 {
        self.table_id
    }

    pub fn stored_columns(&self) -> &[StoredColumn] {
        &self.stored
    }

    pub fn outputs(&self) -> &[OutputColumn] {
        &self.outputs
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|column| column.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

struct Resolver<'a> {
    schema: &'a TableSchema,
    by_name: HashMap<&'a str, &'a ColumnDef>,
    /// Generated columns currently being inlined, for cycle detection.
    visiting: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn lookup(&self, name: &str) -> SampleResult<&'a ColumnDef> {
        self.by_name.get(name).copied().ok_or_else(|| {
            SampleError::Plan(format!(
                "unknown column '{name}' in table {}",
                self.schema.table_id
            ))
        })
    }

    fn bind(&mut self, expr: &GeneratedExpr) -> SampleResult<ResolvedExpr> {
        Ok(match expr {
            GeneratedExpr::Column(name) => {
                let column = self.lookup(name)?;
                if self.schema.is_handle_column(name) {
                    ResolvedExpr::Handle
                } else if let Some(inner) = &column.generated {
                    if self.visiting.iter().any(|seen| seen == name) {
                        return Err(SampleError::Plan(format!(
                            "generated column cycle through '{name}'"
                        )));
                    }
                    self.visiting.push(name.clone());
                    let bound = self.bind(inner)?;
                    self.visiting.pop();
                    bound
                } else {
                    ResolvedExpr::Column(column.id)
                }
            }
            GeneratedExpr::Literal(value) => ResolvedExpr::Literal(value.clone()),
            GeneratedExpr::Add(lhs, rhs) => {
                ResolvedExpr::Add(Box::new(self.bind(lhs)?), Box::new(self.bind(rhs)?))
            }
            GeneratedExpr::Sub(lhs, rhs) => {
                ResolvedExpr::Sub(Box::new(self.bind(lhs)?), Box::new(self.bind(rhs)?))
            }
            GeneratedExpr::Mul(lhs, rhs) => {
                ResolvedExpr::Mul(Box::new(self.bind(lhs)?), Box::new(self.bind(rhs)?))
            }
            GeneratedExpr::Concat(args) => ResolvedExpr::Concat(
                args.iter()
                    .map(|arg| self.bind(arg))
                    .collect::<SampleResult<Vec<_>>>()?,
            ),
            GeneratedExpr::Upper(arg) => ResolvedExpr::Upper(Box::new(self.bind(arg)?)),
        })
    }
}

/// Per-session settings the decoder applies to cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub time_zone: Option<Arc<str>>,
}

impl SessionContext {
    pub fn with_time_zone(time_zone: impl Into<Arc<str>>) -> Self {
        Self {
            time_zone: Some(time_zone.into()),
        }
    }
}
