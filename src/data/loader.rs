use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    DataType, FieldRef, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    Schema, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::json::ArrayWriter;
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{Map, Number, Value as JsonValue};

use super::filter::StainClassifier;
use super::model::Dataset;
use super::table::{Table, TableFormat};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load and validate a specimen dataset. Dispatch by extension.
///
/// Supported formats:
/// * `.json`    – records (`[{...}, ...]`) or pandas column-oriented output
/// * `.csv`     – `slides` cells hold the nested structure as JSON text
/// * `.parquet` – nested columns as JSON values, others by Arrow type
pub fn load_file(path: &Path, classifier: &StainClassifier) -> Result<Dataset> {
    let table = read_table(path)?;
    if table.is_empty() {
        log::warn!("{} contains no rows", path.display());
    }
    let mut dataset = Dataset::from_table(table, classifier)
        .with_context(|| format!("validating {}", path.display()))?;
    dataset.source = Some(path.to_path_buf());
    Ok(dataset)
}

/// Read a file into a [`Table`] without interpreting any cell.
pub fn read_table(path: &Path) -> Result<Table> {
    match extension(path).as_str() {
        "json" => read_json(path),
        "csv" => read_csv(path),
        "parquet" | "pq" => read_parquet(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

pub(crate) fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Two layouts are accepted.
///
/// Records (`df.to_json(orient='records')`):
/// ```json
/// [ { "description": "...", "slides": {...} }, ... ]
/// ```
///
/// Column-oriented (`df.to_json()`, the pandas default):
/// ```json
/// { "description": { "0": "...", "1": "..." }, "slides": { "0": {...}, "1": {...} } }
/// ```
fn read_json(path: &Path) -> Result<Table> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    match root {
        JsonValue::Array(records) => json_records(records),
        JsonValue::Object(columns) => json_columns(columns),
        _ => bail!("Expected a top-level JSON array or object"),
    }
}

fn json_records(records: Vec<JsonValue>) -> Result<Table> {
    let mut columns: Vec<String> = Vec::new();
    let mut objects = Vec::with_capacity(records.len());
    for (i, rec) in records.into_iter().enumerate() {
        let JsonValue::Object(obj) = rec else {
            bail!("Row {i} is not a JSON object");
        };
        for key in obj.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
        objects.push(obj);
    }

    let mut table = Table::new(columns, TableFormat::JsonRecords);
    for (i, mut obj) in objects.into_iter().enumerate() {
        let cells = table
            .columns
            .iter()
            .map(|c| obj.remove(c).unwrap_or(JsonValue::Null))
            .collect();
        table.push_row(i.to_string(), cells);
    }
    Ok(table)
}

fn json_columns(columns: Map<String, JsonValue>) -> Result<Table> {
    let mut labels: Vec<String> = Vec::new();
    let mut cells_by_column = Vec::with_capacity(columns.len());
    for (name, cells) in columns {
        let JsonValue::Object(cells) = cells else {
            bail!("Column '{name}' is not an object of row labels to values");
        };
        for label in cells.keys() {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        cells_by_column.push((name, cells));
    }

    let names = cells_by_column.iter().map(|(n, _)| n.clone()).collect();
    let mut table = Table::new(names, TableFormat::JsonColumns);
    for label in labels {
        let cells = cells_by_column
            .iter_mut()
            .map(|(_, cells)| cells.remove(&label).unwrap_or(JsonValue::Null))
            .collect();
        table.push_row(label, cells);
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, every cell kept as text.
fn read_csv(path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut table = Table::new(headers, TableFormat::Csv);
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let cells = record
            .iter()
            .map(|value| JsonValue::String(value.to_string()))
            .collect();
        table.push_row(row_no.to_string(), cells);
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file written by pandas (`df.to_parquet()`) or polars.
/// Nested columns (pandas dicts and lists) become JSON values; the schema is
/// kept so the file can be written back with the same column types.
fn read_parquet(path: &Path) -> Result<Table> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let schema = builder.schema().clone();
    let reader = builder.build().context("building parquet reader")?;

    let columns = schema.fields().iter().map(|f| f.name().clone()).collect();
    let mut table = Table::new(columns, TableFormat::Parquet);

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let mut nested = schema
            .fields()
            .iter()
            .zip(batch.columns())
            .map(|(field, col)| {
                is_nested(field.data_type())
                    .then(|| nested_values(field, col))
                    .transpose()
            })
            .collect::<Result<Vec<_>>>()?;

        for row in 0..batch.num_rows() {
            let cells = batch
                .columns()
                .iter()
                .zip(nested.iter_mut())
                .map(|(col, nested)| match nested {
                    Some(values) => Ok(values.get_mut(row).map(std::mem::take).unwrap_or_default()),
                    None => extract_value(col, row),
                })
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Row {}", table.len()))?;
            let label = table.len().to_string();
            table.push_row(label, cells);
        }
    }
    table.schema = Some(schema);
    Ok(table)
}

// -- Arrow helpers --

/// Types whose cells are written as JSON objects or arrays.
pub(crate) fn is_nested(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Struct(_)
            | DataType::List(_)
            | DataType::LargeList(_)
            | DataType::FixedSizeList(..)
            | DataType::Map(..)
    )
}

/// Every cell of a nested column as a JSON value, via arrow's JSON writer.
fn nested_values(field: &FieldRef, col: &ArrayRef) -> Result<Vec<JsonValue>> {
    if col.is_empty() {
        return Ok(Vec::new());
    }
    let schema = Arc::new(Schema::new(vec![Arc::clone(field)]));
    let batch = RecordBatch::try_new(schema, vec![Arc::clone(col)])
        .with_context(|| format!("reading column {}", field.name()))?;

    let mut writer = ArrayWriter::new(Vec::new());
    writer
        .write(&batch)
        .with_context(|| format!("converting column {} to JSON", field.name()))?;
    writer.finish().context("finishing JSON conversion")?;
    let rows: Vec<Map<String, JsonValue>> =
        serde_json::from_slice(&writer.into_inner()).context("parsing converted column")?;

    // Null cells are left out of each row object.
    Ok(rows
        .into_iter()
        .map(|mut row| row.remove(field.name()).unwrap_or(JsonValue::Null))
        .collect())
}

fn number<T: Into<f64>>(value: T) -> JsonValue {
    Number::from_f64(value.into())
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

/// Extract a single cell from an Arrow column at a given row.
fn extract_value(col: &ArrayRef, row: usize) -> Result<JsonValue> {
    if col.is_null(row) {
        return Ok(JsonValue::Null);
    }
    let value = match col.data_type() {
        DataType::Utf8 => JsonValue::String(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => JsonValue::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Boolean => JsonValue::Bool(col.as_boolean().value(row)),
        DataType::Int8 => col.as_primitive::<Int8Type>().value(row).into(),
        DataType::Int16 => col.as_primitive::<Int16Type>().value(row).into(),
        DataType::Int32 => col.as_primitive::<Int32Type>().value(row).into(),
        DataType::Int64 => col.as_primitive::<Int64Type>().value(row).into(),
        DataType::UInt8 => col.as_primitive::<UInt8Type>().value(row).into(),
        DataType::UInt16 => col.as_primitive::<UInt16Type>().value(row).into(),
        DataType::UInt32 => col.as_primitive::<UInt32Type>().value(row).into(),
        DataType::UInt64 => col.as_primitive::<UInt64Type>().value(row).into(),
        DataType::Float32 => number(col.as_primitive::<Float32Type>().value(row)),
        DataType::Float64 => number(col.as_primitive::<Float64Type>().value(row)),
        // Dates, timestamps and decimals keep their display text.
        _ => JsonValue::String(
            array_value_to_string(col, row).context("formatting parquet cell")?,
        ),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "slide-selector-{}-{}-{name}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    #[test]
    fn column_oriented_json_keeps_labels_and_order() {
        let path = temp_path("columns.json");
        let text = r#"{"description":{"3":"a","7":"b"},"slides":{"3":{"slides":[]},"7":{"slides":[]}}}"#;
        std::fs::write(&path, text).expect("should write temp table");

        let table = read_table(&path).expect("table should load");
        assert_eq!(table.format, TableFormat::JsonColumns);
        assert_eq!(table.columns, vec!["description", "slides"]);
        assert_eq!(table.index, vec!["3", "7"]);
        assert_eq!(table.cell(1, "description"), Some(&json!("b")));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn records_json_unions_columns() {
        let path = temp_path("records.json");
        let text = r#"[{"description":"a","slides":{"slides":[]}},{"slides":{"slides":[]},"extra":1}]"#;
        std::fs::write(&path, text).expect("should write temp table");

        let table = read_table(&path).expect("table should load");
        assert_eq!(table.columns, vec!["description", "slides", "extra"]);
        assert_eq!(table.cell(0, "extra"), Some(&JsonValue::Null));
        assert_eq!(table.cell(1, "description"), Some(&JsonValue::Null));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn csv_cells_stay_text() {
        let path = temp_path("table.csv");
        let text = "description,slides,year\ncase,\"{\"\"slides\"\": []}\",2023\n";
        std::fs::write(&path, text).expect("should write temp table");

        let dataset = load_file(&path, &StainClassifier::default()).expect("dataset should load");
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.table.cell(0, "year"), Some(&json!("2023")));
        assert_eq!(dataset.source.as_deref(), Some(path.as_path()));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = read_table(Path::new("table.xlsx")).unwrap_err();
        assert!(err.to_string().contains(".xlsx"));
    }

    #[test]
    fn validation_errors_name_the_file_and_row() {
        let path = temp_path("invalid.json");
        std::fs::write(&path, r#"[{"description":"a","slides":{"slides":[{"block":"1"}]}}]"#)
            .expect("should write temp table");

        let err = load_file(&path, &StainClassifier::default()).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("validating"), "{message}");
        assert!(message.contains("row 0"), "{message}");

        let _ = std::fs::remove_file(path);
    }
}
