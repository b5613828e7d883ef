use crate::mask::{MaskError, MaskResult};
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;

/// Read-only storage abstraction for the tabular data a mask is layered over.
///
/// The mask relies on this trait to:
/// - resolve column indices by name
/// - read scalar values by row/column
/// - gather the rows of one group into a contiguous subset
pub trait Dataset: fmt::Debug {
    fn column_names(&self) -> &[String];
    fn row_count(&self) -> usize;
    fn column_index(&self, column: &str) -> Option<usize>;
    fn value_by_idx(&self, row: usize, idx: usize) -> Option<Value>;

    fn value(&self, row: usize, column: &str) -> Option<Value> {
        let idx = self.column_index(column)?;
        self.value_by_idx(row, idx)
    }

    /// Collect the values of column `idx` at `rows`, in order.
    ///
    /// Backends with contiguous column storage can override this to avoid per-cell lookups.
    fn gather(&self, idx: usize, rows: &mut dyn Iterator<Item = usize>) -> MaskResult<Vec<Value>> {
        let row_count = self.row_count();
        rows.map(|row| {
            self.value_by_idx(row, idx)
                .ok_or(MaskError::RowOutOfBounds { row, row_count })
        })
        .collect()
    }
}

/// Column-major in-memory dataset.
#[derive(Clone, Debug)]
pub struct InMemoryDataset {
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    data: Vec<Vec<Value>>,
    row_count: usize,
}

impl InMemoryDataset {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            column_index: HashMap::new(),
            data: Vec::new(),
            row_count: 0,
        }
    }

    /// Build a dataset from `(name, values)` pairs; every column must have the same length.
    pub fn from_columns<N, I>(columns: I) -> MaskResult<Self>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Vec<Value>)>,
    {
        let mut dataset = Self::new();
        for (name, values) in columns {
            dataset.add_column(name, values)?;
        }
        Ok(dataset)
    }

    pub fn add_column(&mut self, name: impl Into<String>, values: Vec<Value>) -> MaskResult<()> {
        let name = name.into();
        if self.column_index.contains_key(&name) {
            return Err(MaskError::DuplicateColumn { column: name });
        }
        if !self.columns.is_empty() && values.len() != self.row_count {
            return Err(MaskError::ColumnLengthMismatch {
                column: name,
                expected: self.row_count,
                actual: values.len(),
            });
        }

        self.row_count = values.len();
        self.column_index.insert(name.clone(), self.columns.len());
        self.columns.push(name);
        self.data.push(values);
        Ok(())
    }

    pub fn column(&self, column: &str) -> Option<&[Value]> {
        let idx = self.column_index(column)?;
        self.data.get(idx).map(Vec::as_slice)
    }
}

impl Default for InMemoryDataset {
    fn default() -> Self {
        Self::new()
    }
}

impl Dataset for InMemoryDataset {
    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn row_count(&self) -> usize {
        self.row_count
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.column_index.get(column).copied()
    }

    fn value_by_idx(&self, row: usize, idx: usize) -> Option<Value> {
        self.data.get(idx)?.get(row).cloned()
    }

    fn gather(&self, idx: usize, rows: &mut dyn Iterator<Item = usize>) -> MaskResult<Vec<Value>> {
        let column = self
            .data
            .get(idx)
            .ok_or_else(|| MaskError::UnknownColumn(format!("#{idx}")))?;
        rows.map(|row| {
            column.get(row).cloned().ok_or(MaskError::RowOutOfBounds {
                row,
                row_count: self.row_count,
            })
        })
        .collect()
    }
}
