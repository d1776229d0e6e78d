use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value as JsonValue};

use super::export::{COMMENTS_COLUMN, SELECTED_SCANS_COLUMN};
use super::filter::StainClassifier;
use super::model::{
    split_base_dir, DatasetError, ScanGroup, Selection, SlideInfo, SpecimenRecord,
    AUTO_SELECTED_FLAG,
};
use super::sorting;
use super::table::Table;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Build one [`SpecimenRecord`] per table row.
///
/// Expected cells (per row):
///
/// ```json
/// {
///   "description": "Case ID: ...",
///   "slides": {
///     "slides": [
///       {
///         "pa_number": "T23-12345", "specimen_nr": "I", "block": "1",
///         "staining": "H&E",
///         "scan": [{ "base_dir": "...", "files": { "THUMBNAIL": [...], "SLIDE": [...] } }]
///       }
///     ]
///   }
/// }
/// ```
///
/// `slides` may also be a JSON string of that object. Existing `comments`
/// and `selected_scans` columns restore an earlier session.
pub fn parse_records(
    table: &Table,
    classifier: &StainClassifier,
) -> Result<Vec<SpecimenRecord>, DatasetError> {
    let desc_col = table
        .column_index("description")
        .ok_or(DatasetError::MissingColumn("description"))?;
    let slides_col = table
        .column_index("slides")
        .ok_or(DatasetError::MissingColumn("slides"))?;
    let comments_col = table.column_index(COMMENTS_COLUMN);
    let selected_col = table.column_index(SELECTED_SCANS_COLUMN);

    table
        .rows
        .iter()
        .enumerate()
        .map(|(row, cells)| {
            let mut record = parse_record(row, &cells[desc_col], &cells[slides_col], classifier)?;
            if let Some(text) = comments_col.and_then(|col| cells[col].as_str()) {
                record.comment = text.to_string();
            }
            if let Some(col) = selected_col {
                restore_selection(row, &mut record, &cells[col])?;
            }
            Ok(record)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Row → record
// ---------------------------------------------------------------------------

fn parse_record(
    row: usize,
    description: &JsonValue,
    slides: &JsonValue,
    classifier: &StainClassifier,
) -> Result<SpecimenRecord, DatasetError> {
    let description = match description {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => {
            return Err(invalid(
                row,
                format!("description must be text, got {}", kind(other)),
            ))
        }
    };

    let info = json_object(row, slides, "slides")?;
    let slide_values = info
        .get("slides")
        .ok_or_else(|| DatasetError::MissingKey {
            row,
            key: "slides",
            context: "the slides cell".to_string(),
        })?
        .as_array()
        .ok_or_else(|| invalid(row, "'slides' must be a list".to_string()))?;

    let mut parsed: Vec<Option<(SlideInfo, Vec<ScanGroup>)>> = slide_values
        .iter()
        .enumerate()
        .map(|(i, value)| parse_slide(row, i, value, classifier).map(Some))
        .collect::<Result<_, _>>()?;

    let infos: Vec<SlideInfo> = parsed.iter().flatten().map(|(s, _)| s.clone()).collect();
    let mut slides = Vec::with_capacity(infos.len());
    let mut scans = Vec::new();
    for (position, original) in sorting::slide_order(&infos).into_iter().enumerate() {
        if let Some((slide, slide_scans)) = parsed[original].take() {
            slides.push(slide);
            scans.extend(slide_scans.into_iter().map(|mut scan| {
                scan.slide = position;
                scan
            }));
        }
    }

    let pa_numbers: BTreeSet<&str> = slides.iter().map(|s| s.pa_number.as_str()).collect();
    if pa_numbers.len() > 1 {
        let found = pa_numbers.into_iter().collect::<Vec<_>>().join(", ");
        return Err(DatasetError::MixedPaNumbers { row, found });
    }
    let pa_number = pa_numbers.into_iter().next().map(str::to_string);

    let selection = scans
        .iter()
        .enumerate()
        .filter(|(_, scan)| scan.raw.get("selected") == Some(&JsonValue::Bool(true)))
        .map(|(i, scan)| selection_from_raw(i, &scan.raw))
        .collect();

    let comment = info
        .get("comments")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(SpecimenRecord {
        description,
        pa_number,
        slides,
        scans,
        selection,
        comment,
    })
}

fn parse_slide(
    row: usize,
    index: usize,
    value: &JsonValue,
    classifier: &StainClassifier,
) -> Result<(SlideInfo, Vec<ScanGroup>), DatasetError> {
    let context = format!("slide {index}");
    let obj = value
        .as_object()
        .ok_or_else(|| invalid(row, format!("{context} is not an object")))?;

    let pa_number = scalar_text(row, obj, "pa_number", &context)?;
    let specimen_nr = sorting::number_to_roman(&scalar_text(row, obj, "specimen_nr", &context)?);
    let block = scalar_text(row, obj, "block", &context)?;
    let staining = scalar_text(row, obj, "staining", &context)?;

    let scan_values = obj
        .get("scan")
        .ok_or_else(|| DatasetError::MissingKey {
            row,
            key: "scan",
            context: context.clone(),
        })?
        .as_array()
        .ok_or_else(|| invalid(row, format!("{context}: 'scan' must be a list")))?;

    let scans = scan_values
        .iter()
        .enumerate()
        .map(|(j, v)| parse_scan(row, &format!("{context} scan {j}"), v))
        .collect::<Result<Vec<_>, _>>()?;

    let fields: Map<String, JsonValue> = obj
        .iter()
        .filter(|(key, _)| key.as_str() != "scan")
        .map(|(key, val)| (key.clone(), val.clone()))
        .collect();

    let slide = SlideInfo {
        pa_number,
        specimen_nr,
        block,
        stain: classifier.classify(&staining),
        staining,
        fields,
    };
    Ok((slide, scans))
}

fn parse_scan(row: usize, context: &str, value: &JsonValue) -> Result<ScanGroup, DatasetError> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid(row, format!("{context} is not an object")))?;

    let base_dir = match obj.get("base_dir") {
        Some(JsonValue::String(s)) => s.as_str(),
        Some(other) => {
            return Err(invalid(
                row,
                format!("{context}: 'base_dir' must be text, got {}", kind(other)),
            ))
        }
        None => {
            return Err(DatasetError::MissingKey {
                row,
                key: "base_dir",
                context: context.to_string(),
            })
        }
    };

    let files_obj = obj
        .get("files")
        .ok_or_else(|| DatasetError::MissingKey {
            row,
            key: "files",
            context: context.to_string(),
        })?
        .as_object()
        .ok_or_else(|| {
            invalid(
                row,
                format!("{context}: 'files' must map file kinds to file names"),
            )
        })?;

    let mut files = BTreeMap::new();
    for (tag, names) in files_obj {
        let names = names
            .as_array()
            .ok_or_else(|| invalid(row, format!("{context}: files['{tag}'] must be a list")))?
            .iter()
            .map(|name| {
                name.as_str().map(str::to_string).ok_or_else(|| {
                    invalid(row, format!("{context}: files['{tag}'] must hold file names"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        files.insert(tag.clone(), names);
    }

    Ok(ScanGroup {
        slide: 0,
        base_dir: split_base_dir(base_dir),
        files,
        raw: obj.clone(),
    })
}

// ---------------------------------------------------------------------------
// Restoring an earlier session
// ---------------------------------------------------------------------------

fn selection_from_raw(scan: usize, raw: &Map<String, JsonValue>) -> Selection {
    let score = raw
        .get("score")
        .and_then(JsonValue::as_u64)
        .and_then(|v| u32::try_from(v).ok());
    let automatic = raw
        .get("flags")
        .and_then(JsonValue::as_array)
        .is_some_and(|flags| flags.iter().any(|f| f.as_str() == Some(AUTO_SELECTED_FLAG)));
    Selection {
        scan,
        score,
        automatic,
    }
}

/// A `selected_scans` column, when present, replaces flags found on scans.
fn restore_selection(
    row: usize,
    record: &mut SpecimenRecord,
    cell: &JsonValue,
) -> Result<(), DatasetError> {
    record.selection.clear();
    let info = match cell {
        JsonValue::Null => return Ok(()),
        JsonValue::String(s) if s.trim().is_empty() => return Ok(()),
        other => json_object(row, other, SELECTED_SCANS_COLUMN)?,
    };
    let slides = info
        .get("slides")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| invalid(row, format!("{SELECTED_SCANS_COLUMN} must hold a 'slides' list")))?;

    let selected = slides
        .iter()
        .filter_map(|slide| slide.get("scan").and_then(JsonValue::as_array))
        .flatten()
        .filter_map(JsonValue::as_object);
    for obj in selected {
        match record.scans.iter().position(|scan| scan.same_files(obj)) {
            Some(i) if !record.is_selected(i) => record.selection.push(selection_from_raw(i, obj)),
            Some(_) => {}
            None => log::warn!(
                "row {row}: a previously selected scan ({}) is no longer listed for this specimen",
                obj.get("base_dir").and_then(JsonValue::as_str).unwrap_or("?")
            ),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn invalid(row: usize, message: String) -> DatasetError {
    DatasetError::InvalidRow { row, message }
}

fn kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "text",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "an object",
    }
}

/// Accept an object, or a JSON string of one. Archive exports often quote
/// with `'`, so a failed parse is retried with double quotes.
fn json_object(row: usize, value: &JsonValue, what: &str) -> Result<Map<String, JsonValue>, DatasetError> {
    let parsed = match value {
        JsonValue::Object(map) => return Ok(map.clone()),
        JsonValue::String(text) => serde_json::from_str::<JsonValue>(text)
            .or_else(|_| serde_json::from_str::<JsonValue>(&text.replace('\'', "\"")))
            .map_err(|e| invalid(row, format!("{what} is not valid JSON: {e}")))?,
        other => {
            return Err(invalid(
                row,
                format!("{what} must be an object, got {}", kind(other)),
            ))
        }
    };
    match parsed {
        JsonValue::Object(map) => Ok(map),
        other => Err(invalid(
            row,
            format!("{what} must be an object, got {}", kind(&other)),
        )),
    }
}

/// Text form of a scalar slide field. Whole floats (pandas upcasts integer
/// columns holding nulls) lose their `.0`.
fn scalar_text(
    row: usize,
    obj: &Map<String, JsonValue>,
    key: &'static str,
    context: &str,
) -> Result<String, DatasetError> {
    match obj.get(key) {
        None => Err(DatasetError::MissingKey {
            row,
            key,
            context: context.to_string(),
        }),
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(JsonValue::Null) => Ok(String::new()),
        Some(JsonValue::Bool(b)) => Ok(b.to_string()),
        Some(JsonValue::Number(n)) => Ok(match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        }),
        Some(other) => Err(invalid(
            row,
            format!("{context}: '{key}' must be a single value, got {}", kind(other)),
        )),
    }
}
