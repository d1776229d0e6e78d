use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    new_empty_array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, FieldRef, Schema};
use arrow::json::ReaderBuilder;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde_json::{json, Map, Value as JsonValue};

use super::loader::{extension, is_nested};
use super::model::{Dataset, SpecimenRecord, AUTO_SELECTED_FLAG};
use super::table::{Table, TableFormat};

/// Column holding the selected scans per specimen.
pub const SELECTED_SCANS_COLUMN: &str = "selected_scans";
/// Column holding the free-text comment per specimen.
pub const COMMENTS_COLUMN: &str = "comments";

// ---------------------------------------------------------------------------
// Dataset → Table
// ---------------------------------------------------------------------------

impl Dataset {
    /// The source table with the selection and comment columns merged in.
    /// Every other cell is copied unchanged.
    pub fn export(&self) -> Table {
        let mut table = self.table.clone();
        table.set_column(
            SELECTED_SCANS_COLUMN,
            self.records.iter().map(selected_scans).collect(),
        );
        table.set_column(
            COMMENTS_COLUMN,
            self.records
                .iter()
                .map(|r| JsonValue::String(r.comment.clone()))
                .collect(),
        );
        table
    }
}

/// `null` when nothing is selected, otherwise the slides holding selected
/// scans, each reduced to those scans.
pub fn selected_scans(record: &SpecimenRecord) -> JsonValue {
    if record.selection.is_empty() {
        return JsonValue::Null;
    }

    let mut slides = Vec::new();
    for (slide_index, slide) in record.slides.iter().enumerate() {
        let scans: Vec<JsonValue> = record
            .selection
            .iter()
            .filter_map(|sel| {
                let scan = record.scans.get(sel.scan)?;
                if scan.slide != slide_index {
                    return None;
                }
                let mut obj = scan.raw.clone();
                let flags = merged_flags(obj.get("flags"), slide.stain.flag(), sel.automatic);
                obj.insert("selected".into(), JsonValue::Bool(true));
                obj.insert("score".into(), sel.score.map_or(JsonValue::Null, |s| json!(s)));
                obj.insert("flags".into(), JsonValue::Array(flags));
                Some(JsonValue::Object(obj))
            })
            .collect();
        if scans.is_empty() {
            continue;
        }
        let mut obj = slide.fields.clone();
        obj.insert("scan".into(), JsonValue::Array(scans));
        slides.push(JsonValue::Object(obj));
    }

    json!({ "slides": slides, "comments": record.comment })
}

/// Flags already on the scan, followed by the staining flag and, for
/// automatic selections, the auto-selected flag.
fn merged_flags(existing: Option<&JsonValue>, stain: &str, automatic: bool) -> Vec<JsonValue> {
    let mut flags: Vec<JsonValue> = existing
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter(|f| f.as_str() != Some(AUTO_SELECTED_FLAG))
        .cloned()
        .collect();
    let mut add = |flag: &str| {
        if !flags.iter().any(|f| f.as_str() == Some(flag)) {
            flags.push(json!(flag));
        }
    };
    add(stain);
    if automatic {
        add(AUTO_SELECTED_FLAG);
    }
    flags
}

// ---------------------------------------------------------------------------
// Table → file
// ---------------------------------------------------------------------------

/// Write a table, choosing the format by extension. The file is written
/// next to its destination and renamed into place.
pub fn save_file(table: &Table, path: &Path) -> Result<()> {
    let ext = extension(path);
    let write: fn(&Table, File) -> Result<()> = match ext.as_str() {
        "json" => write_json,
        "csv" => write_csv,
        "parquet" | "pq" => write_parquet,
        other => bail!("Unsupported output extension: .{other}"),
    };

    let tmp = path.with_extension(format!("{ext}.tmp"));
    let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    write(table, file)?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("moving results into {}", path.display()))?;
    Ok(())
}

/// JSON keeps the source layout; tables read from other formats are written
/// as records.
fn write_json(table: &Table, file: File) -> Result<()> {
    let root = if table.format == TableFormat::JsonColumns {
        let mut columns = Map::new();
        for (col, name) in table.columns.iter().enumerate() {
            let cells: Map<String, JsonValue> = table
                .index
                .iter()
                .zip(&table.rows)
                .map(|(label, row)| (label.clone(), row[col].clone()))
                .collect();
            columns.insert(name.clone(), JsonValue::Object(cells));
        }
        JsonValue::Object(columns)
    } else {
        JsonValue::Array(
            (0..table.len())
                .map(|row| JsonValue::Object(table.row_object(row)))
                .collect(),
        )
    };

    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &root).context("writing JSON")?;
    writer.flush().context("flushing JSON")?;
    Ok(())
}

fn cell_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_csv(table: &Table, file: File) -> Result<()> {
    let mut writer = csv::Writer::from_writer(file);
    writer
        .write_record(&table.columns)
        .context("writing CSV header")?;
    for (i, row) in table.rows.iter().enumerate() {
        writer
            .write_record(row.iter().map(cell_text))
            .with_context(|| format!("writing CSV row {i}"))?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

// -- Parquet --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

/// Narrowest Arrow type able to hold every non-null cell.
fn column_kind<'a>(cells: impl Iterator<Item = &'a JsonValue>) -> ColumnKind {
    let mut kind = None;
    for cell in cells {
        let cell_kind = match cell {
            JsonValue::Null => continue,
            JsonValue::Bool(_) => ColumnKind::Bool,
            JsonValue::Number(n) if n.is_i64() => ColumnKind::Int,
            JsonValue::Number(_) => ColumnKind::Float,
            _ => return ColumnKind::Text,
        };
        kind = Some(match (kind, cell_kind) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Int), ColumnKind::Float) | (Some(ColumnKind::Float), ColumnKind::Int) => {
                ColumnKind::Float
            }
            _ => return ColumnKind::Text,
        });
    }
    kind.unwrap_or(ColumnKind::Text)
}

/// Array of inferred type for columns without a source schema.
fn inferred_array(cells: &[&JsonValue]) -> (DataType, ArrayRef) {
    let values = cells.iter().copied();
    match column_kind(values.clone()) {
        ColumnKind::Int => (
            DataType::Int64,
            Arc::new(Int64Array::from(values.map(JsonValue::as_i64).collect::<Vec<_>>())),
        ),
        ColumnKind::Float => (
            DataType::Float64,
            Arc::new(Float64Array::from(values.map(JsonValue::as_f64).collect::<Vec<_>>())),
        ),
        ColumnKind::Bool => (
            DataType::Boolean,
            Arc::new(BooleanArray::from(values.map(JsonValue::as_bool).collect::<Vec<_>>())),
        ),
        ColumnKind::Text => (
            DataType::Utf8,
            Arc::new(StringArray::from(
                values
                    .map(|v| (!v.is_null()).then(|| cell_text(v)))
                    .collect::<Vec<Option<String>>>(),
            )),
        ),
    }
}

/// Rebuild a column read from Parquet with its original Arrow type.
fn source_array(field: &FieldRef, cells: &[&JsonValue]) -> Result<ArrayRef> {
    if !is_nested(field.data_type()) {
        let (data_type, array) = inferred_array(cells);
        if &data_type == field.data_type() {
            return Ok(array);
        }
        return cast(&array, field.data_type())
            .with_context(|| format!("converting back to {}", field.data_type()));
    }

    if cells.is_empty() {
        return Ok(new_empty_array(field.data_type()));
    }
    let rows: Vec<JsonValue> = cells
        .iter()
        .map(|&value| {
            let mut row = Map::new();
            row.insert(field.name().clone(), value.clone());
            JsonValue::Object(row)
        })
        .collect();
    let schema = Arc::new(Schema::new(vec![Arc::clone(field)]));
    let mut decoder = ReaderBuilder::new(schema)
        .with_batch_size(rows.len())
        .build_decoder()
        .context("creating JSON decoder")?;
    decoder.serialize(&rows).context("decoding nested cells")?;
    let batch = decoder
        .flush()
        .context("decoding nested cells")?
        .context("no rows decoded")?;
    Ok(Arc::clone(batch.column(0)))
}

/// Columns read from Parquet keep their source type; the result columns
/// and columns of other sources are typed by their values.
fn write_parquet(table: &Table, file: File) -> Result<()> {
    let mut fields = Vec::with_capacity(table.columns.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns.len());

    for (col, name) in table.columns.iter().enumerate() {
        let cells: Vec<&JsonValue> = table.rows.iter().map(|row| &row[col]).collect();
        let source = table
            .schema
            .as_ref()
            .filter(|_| name != SELECTED_SCANS_COLUMN && name != COMMENTS_COLUMN)
            .and_then(|schema| schema.field_with_name(name).ok());

        match source {
            Some(field) => {
                let field = Arc::new(field.clone());
                let array = source_array(&field, &cells)
                    .with_context(|| format!("writing column {name}"))?;
                fields.push(field);
                arrays.push(array);
            }
            None => {
                let (data_type, array) = inferred_array(&cells);
                fields.push(Arc::new(Field::new(name, data_type, true)));
                arrays.push(array);
            }
        }
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays).context("building record batch")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}
