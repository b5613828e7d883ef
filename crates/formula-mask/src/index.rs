use crate::dataset::Dataset;
use crate::mask::{MaskError, MaskResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Identifies one group of rows: its 0-based ordinal and the row positions belonging to it.
///
/// Indices are produced by whatever computed the grouping and handed to the mask per group.
/// Cloning is cheap; grouped row lists are shared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlicingIndex {
    /// Every row of an ungrouped dataset, as group 0.
    Natural { rows: usize },
    Grouped { group: usize, rows: Arc<[usize]> },
    /// A single row treated as its own group; the ordinal is the row position.
    Rowwise { row: usize },
}

impl SlicingIndex {
    pub fn natural(rows: usize) -> Self {
        SlicingIndex::Natural { rows }
    }

    pub fn grouped(group: usize, rows: impl Into<Arc<[usize]>>) -> Self {
        SlicingIndex::Grouped {
            group,
            rows: rows.into(),
        }
    }

    pub fn rowwise(row: usize) -> Self {
        SlicingIndex::Rowwise { row }
    }

    /// Number of rows in the group.
    pub fn size(&self) -> usize {
        match self {
            SlicingIndex::Natural { rows } => *rows,
            SlicingIndex::Grouped { rows, .. } => rows.len(),
            SlicingIndex::Rowwise { .. } => 1,
        }
    }

    /// 0-based group ordinal.
    pub fn group(&self) -> usize {
        match self {
            SlicingIndex::Natural { .. } => 0,
            SlicingIndex::Grouped { group, .. } => *group,
            SlicingIndex::Rowwise { row } => *row,
        }
    }

    /// Dataset row position of the `i`-th row of the group.
    pub fn row(&self, i: usize) -> Option<usize> {
        match self {
            SlicingIndex::Natural { rows } => (i < *rows).then_some(i),
            SlicingIndex::Grouped { rows, .. } => rows.get(i).copied(),
            SlicingIndex::Rowwise { row } => (i == 0).then_some(*row),
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.size()).filter_map(move |i| self.row(i))
    }
}

/// How the dataset handed to a mask is partitioned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataShape {
    /// One group spanning every row; selects the eager fast path.
    Ungrouped,
    Grouped,
    Rowwise,
}

/// The ordered, duplicate-free set of column names a mask exposes, each mapped to the dataset
/// column backing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variables {
    names: Vec<String>,
    columns: Vec<usize>,
    positions: HashMap<String, usize>,
}

impl Variables {
    /// Expose every column of `dataset`, in dataset order.
    pub fn all(dataset: &dyn Dataset) -> Self {
        let names = dataset.column_names().to_vec();
        let columns = (0..names.len()).collect();
        let positions = names
            .iter()
            .enumerate()
            .map(|(pos, name)| (name.clone(), pos))
            .collect();
        Self {
            names,
            columns,
            positions,
        }
    }

    /// Expose a subset of `dataset`'s columns, in the given order.
    pub fn new<I, S>(dataset: &dyn Dataset, names: I) -> MaskResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Self {
            names: Vec::new(),
            columns: Vec::new(),
            positions: HashMap::new(),
        };
        for name in names {
            let name = name.into();
            let column = dataset
                .column_index(&name)
                .ok_or_else(|| MaskError::UnknownColumn(name.clone()))?;
            if out.positions.contains_key(&name) {
                return Err(MaskError::DuplicateVariable(name));
            }
            out.positions.insert(name.clone(), out.names.len());
            out.names.push(name);
            out.columns.push(column);
        }
        Ok(out)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// Position of `name` within the declared set.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Dataset column index backing `name`.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.position(name).map(|pos| self.columns[pos])
    }

    pub(crate) fn column_at(&self, pos: usize) -> usize {
        self.columns[pos]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDataset;
    use crate::value::Value;

    #[test]
    fn index_accessors() {
        let idx = SlicingIndex::grouped(4, vec![2, 5, 7]);
        assert_eq!(idx.size(), 3);
        assert_eq!(idx.group(), 4);
        assert_eq!(idx.rows().collect::<Vec<_>>(), vec![2, 5, 7]);

        let natural = SlicingIndex::natural(3);
        assert_eq!(natural.rows().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(natural.group(), 0);

        let rowwise = SlicingIndex::rowwise(9);
        assert_eq!(rowwise.size(), 1);
        assert_eq!(rowwise.group(), 9);
        assert_eq!(rowwise.rows().collect::<Vec<_>>(), vec![9]);
    }

    #[test]
    fn variables_validate_names() {
        let dataset = InMemoryDataset::from_columns([
            ("a", vec![Value::from(1)]),
            ("b", vec![Value::from(2)]),
        ])
        .unwrap();

        let vars = Variables::new(&dataset, ["b", "a"]).unwrap();
        assert_eq!(vars.names(), ["b".to_string(), "a".to_string()]);
        assert_eq!(vars.column("b"), Some(1));

        assert!(matches!(
            Variables::new(&dataset, ["a", "a"]),
            Err(MaskError::DuplicateVariable(name)) if name == "a"
        ));
        assert!(matches!(
            Variables::new(&dataset, ["zzz"]),
            Err(MaskError::UnknownColumn(name)) if name == "zzz"
        ));
    }
}
