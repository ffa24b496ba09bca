//! Binding types for query results
//!
//! - [`Binding`]: one variable's state in a solution
//! - [`Batch`]: columnar batch of solutions
//! - [`RowView`]: zero-copy view of a single row

use crate::value::Value;
use crate::var_registry::VarId;
use std::sync::Arc;
use thiserror::Error;

/// A variable's state in one solution row
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Binding {
    /// Variable is not bound in this row
    Unbound,
    /// Variable is bound to a value
    Bound(Value),
}

impl Binding {
    /// Check if this binding carries a value
    pub fn is_bound(&self) -> bool {
        matches!(self, Binding::Bound(_))
    }

    /// Get the value if bound
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Binding::Bound(v) => Some(v),
            Binding::Unbound => None,
        }
    }

    /// Take the value if bound
    pub fn into_value(self) -> Option<Value> {
        match self {
            Binding::Bound(v) => Some(v),
            Binding::Unbound => None,
        }
    }
}

impl From<Value> for Binding {
    fn from(v: Value) -> Self {
        Binding::Bound(v)
    }
}

/// Error type for batch construction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// Column lengths don't match
    #[error("column {column} has {got} rows, expected {expected}")]
    ColumnLengthMismatch {
        expected: usize,
        got: usize,
        column: usize,
    },
    /// Schema has duplicate VarIds
    #[error("duplicate variable {0:?} in batch schema")]
    DuplicateVar(VarId),
    /// Schema length doesn't match columns length
    #[error("schema has {schema_len} vars but {columns_len} columns provided")]
    SchemaColumnMismatch {
        schema_len: usize,
        columns_len: usize,
    },
    /// Row width doesn't match schema
    #[error("row has {got} bindings, schema has {expected}")]
    RowWidthMismatch { expected: usize, got: usize },
}

/// A batch of solutions, stored column-wise
///
/// # Invariants
///
/// - `columns.len() == schema.len()`
/// - all columns have exactly `len` elements
/// - schema contains no duplicate VarIds
#[derive(Debug, Clone)]
pub struct Batch {
    len: usize,
    schema: Arc<[VarId]>,
    columns: Vec<Vec<Binding>>,
}

impl Batch {
    /// Create a new batch, enforcing invariants
    pub fn new(schema: Arc<[VarId]>, columns: Vec<Vec<Binding>>) -> Result<Self, BatchError> {
        if schema.len() != columns.len() {
            return Err(BatchError::SchemaColumnMismatch {
                schema_len: schema.len(),
                columns_len: columns.len(),
            });
        }

        // Schemas are tiny; quadratic duplicate check is fine
        for (i, &var) in schema.iter().enumerate() {
            if schema.iter().take(i).any(|&v| v == var) {
                return Err(BatchError::DuplicateVar(var));
            }
        }

        let len = columns.first().map(|c| c.len()).unwrap_or(0);
        for (i, col) in columns.iter().enumerate() {
            if col.len() != len {
                return Err(BatchError::ColumnLengthMismatch {
                    expected: len,
                    got: col.len(),
                    column: i,
                });
            }
        }

        Ok(Self {
            len,
            schema,
            columns,
        })
    }

    /// Create an empty batch with the given schema (zero rows)
    pub fn empty(schema: Arc<[VarId]>) -> Self {
        let columns = schema.iter().map(|_| Vec::new()).collect();
        Self {
            len: 0,
            schema,
            columns,
        }
    }

    /// Build a batch from row-major data
    pub fn from_rows(
        schema: Arc<[VarId]>,
        rows: impl IntoIterator<Item = Vec<Binding>>,
    ) -> Result<Self, BatchError> {
        let mut columns: Vec<Vec<Binding>> = schema.iter().map(|_| Vec::new()).collect();
        for row in rows {
            if row.len() != schema.len() {
                return Err(BatchError::RowWidthMismatch {
                    expected: schema.len(),
                    got: row.len(),
                });
            }
            for (col, binding) in columns.iter_mut().zip(row) {
                col.push(binding);
            }
        }
        Self::new(schema, columns)
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Schema: variables in column order
    pub fn schema(&self) -> &[VarId] {
        &self.schema
    }

    /// Get a binding by row and variable
    ///
    /// Linear scan over the schema; schemas are typically tiny.
    pub fn get(&self, row: usize, var: VarId) -> Option<&Binding> {
        let col = self.schema.iter().position(|&v| v == var)?;
        self.columns.get(col)?.get(row)
    }

    /// Get a binding by row and column index
    ///
    /// # Panics
    ///
    /// Panics if out of bounds.
    pub fn get_by_col(&self, row: usize, col: usize) -> &Binding {
        &self.columns[col][row]
    }

    /// View one row without copying
    pub fn row_view(&self, row: usize) -> Option<RowView<'_>> {
        (row < self.len).then_some(RowView { batch: self, row })
    }

    /// Iterate over rows
    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> {
        (0..self.len).map(move |row| RowView { batch: self, row })
    }
}

/// Zero-copy view of one row in a batch
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    batch: &'a Batch,
    row: usize,
}

impl<'a> RowView<'a> {
    /// Get a binding by variable
    pub fn get(&self, var: VarId) -> Option<&'a Binding> {
        self.batch.get(self.row, var)
    }

    /// Get a binding by column index
    pub fn get_by_col(&self, col: usize) -> Option<&'a Binding> {
        self.batch.columns.get(col)?.get(self.row)
    }

    /// The batch schema
    pub fn schema(&self) -> &[VarId] {
        self.batch.schema()
    }

    /// Copy this row out as a Vec in schema order
    pub fn to_vec(&self) -> Vec<Binding> {
        self.batch
            .columns
            .iter()
            .map(|col| col[self.row].clone())
            .collect()
    }
}
