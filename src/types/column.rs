//! # Column Definitions and Operator Schemas
//!
//! `ColumnDef` pairs a name with a `DataType` and an optional declared length
//! for VARCHAR(n)/CHAR(n)/BLOB(n). `Schema` is the ordered column list an
//! operator produces; its `row_size` decides how many rows fit on a page.
//!
//! ## Usage
//!
//! ```ignore
//! use spillway::types::{ColumnDef, DataType, Schema};
//!
//! let schema = Schema::new(vec![
//!     ColumnDef::new("id", DataType::Int8),
//!     ColumnDef::varchar("name", Some(24)),
//! ]);
//! assert_eq!(schema.row_size(), 32);
//! ```

use super::DataType;
use crate::config::DEFAULT_VARLEN_WIDTH;

/// Column definition with type and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    name: String,
    data_type: DataType,
    char_length: Option<u32>,
}

impl ColumnDef {
    /// Creates a new column definition with the given name and type.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            char_length: None,
        }
    }

    /// Creates a CHAR(n) column.
    pub fn char(name: impl Into<String>, length: u32) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Char,
            char_length: Some(length),
        }
    }

    /// Creates a VARCHAR(n) column. Pass None for unlimited length.
    pub fn varchar(name: impl Into<String>, length: Option<u32>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Varchar,
            char_length: length,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn char_length(&self) -> Option<u32> {
        self.char_length
    }

    /// Bytes this column is charged in a row.
    pub fn width(&self) -> usize {
        match self.data_type.fixed_size() {
            Some(size) => size,
            None => self
                .char_length
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_VARLEN_WIDTH),
        }
    }
}

/// Ordered list of columns produced by an operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, idx: usize) -> Option<&ColumnDef> {
        self.columns.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Sum of column widths; the divisor of the page size.
    pub fn row_size(&self) -> usize {
        self.columns.iter().map(ColumnDef::width).sum()
    }

    /// Left columns followed by right columns.
    pub fn join(left: &Schema, right: &Schema) -> Schema {
        let mut columns = Vec::with_capacity(left.len() + right.len());
        columns.extend(left.columns.iter().cloned());
        columns.extend(right.columns.iter().cloned());
        Schema { columns }
    }

    /// Keeps only the given column indices, in the given order. Out-of-range
    /// indices are skipped; callers validate indices before projecting.
    pub fn project(&self, indices: &[usize]) -> Schema {
        Schema {
            columns: indices
                .iter()
                .filter_map(|&i| self.columns.get(i).cloned())
                .collect(),
        }
    }
}
