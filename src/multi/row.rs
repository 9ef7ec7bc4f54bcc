use std::collections::HashMap;
use std::sync::Arc;

use crate::types::RowValues;

/// Column name to position, built once per result set and shared by its rows.
pub(crate) type ColumnIndex = Arc<HashMap<String, usize>>;

pub(crate) fn column_index(columns: &[String]) -> ColumnIndex {
    Arc::new(
        columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect(),
    )
}

/// A row from a query result, with access to both the column names and the values.
#[derive(Debug, Clone)]
pub struct Row {
    /// Column names shared across all rows of one result set.
    pub column_names: Arc<Vec<String>>,
    pub values: Vec<RowValues>,
    index: ColumnIndex,
}

impl Row {
    pub(crate) fn with_index(
        column_names: Arc<Vec<String>>,
        index: ColumnIndex,
        values: Vec<RowValues>,
    ) -> Self {
        Self {
            column_names,
            values,
            index,
        }
    }

    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<RowValues>) -> Self {
        let index = column_index(&column_names);
        Self::with_index(column_names, index, values)
    }

    #[must_use]
    pub fn column_index(&self, column_name: &str) -> Option<usize> {
        self.index.get(column_name).copied()
    }

    /// Value of the named column, or `None` if there is no such column.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    #[must_use]
    pub fn into_values(self) -> Vec<RowValues> {
        self.values
    }
}

/// All rows of one result set.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub rows: Vec<Row>,
    column_names: Arc<Vec<String>>,
}

impl RowSet {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>) -> Self {
        Self {
            rows: Vec::new(),
            column_names,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl<'a> IntoIterator for &'a RowSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
