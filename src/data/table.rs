use arrow::datatypes::SchemaRef;
use serde_json::{Map, Value as JsonValue};

// ---------------------------------------------------------------------------
// TableFormat – how the table was laid out on disk
// ---------------------------------------------------------------------------

/// Source layout of a table, used to write results back the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    /// `[{ "col": value, ... }, ...]` (pandas `orient="records"`).
    JsonRecords,
    /// `{ "col": { "label": value, ... }, ... }` (pandas default `to_json`).
    JsonColumns,
    Csv,
    Parquet,
}

// ---------------------------------------------------------------------------
// Table – rows of JSON cells with ordered columns
// ---------------------------------------------------------------------------

/// An in-memory table. Cells are kept exactly as they were read so that
/// columns the tool does not understand pass through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Column names in source order.
    pub columns: Vec<String>,
    /// Row labels (pandas index). `"0".."n-1"` when the source has none.
    pub index: Vec<String>,
    /// One vector of cells per row, aligned with `columns`.
    pub rows: Vec<Vec<JsonValue>>,
    pub format: TableFormat,
    /// Arrow schema of a Parquet source, used to write columns back with
    /// their original types.
    pub schema: Option<SchemaRef>,
}

impl Table {
    pub fn new(columns: Vec<String>, format: TableFormat) -> Self {
        Self {
            columns,
            index: Vec::new(),
            rows: Vec::new(),
            format,
            schema: None,
        }
    }

    /// Append a row. Missing trailing cells are padded with `null`.
    pub fn push_row(&mut self, label: String, mut cells: Vec<JsonValue>) {
        cells.resize(self.columns.len(), JsonValue::Null);
        self.index.push(label);
        self.rows.push(cells);
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `row` in column `name`, if both exist.
    pub fn cell(&self, row: usize, name: &str) -> Option<&JsonValue> {
        let col = self.column_index(name)?;
        self.rows.get(row)?.get(col)
    }

    /// Replace the cells of column `name`, appending the column when absent.
    ///
    /// `values` must hold one cell per row.
    pub fn set_column(&mut self, name: &str, values: Vec<JsonValue>) {
        debug_assert_eq!(values.len(), self.rows.len());
        let col = match self.column_index(name) {
            Some(col) => col,
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(JsonValue::Null);
                }
                self.columns.len() - 1
            }
        };
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[col] = value;
        }
    }

    /// One row as an ordered JSON object.
    pub fn row_object(&self, row: usize) -> Map<String, JsonValue> {
        let mut obj = Map::new();
        if let Some(cells) = self.rows.get(row) {
            for (name, value) in self.columns.iter().zip(cells) {
                obj.insert(name.clone(), value.clone());
            }
        }
        obj
    }
}
