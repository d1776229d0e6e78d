//! Small datasets shared by tests across modules.

use serde_json::{json, Value as JsonValue};

use super::filter::StainClassifier;
use super::model::Dataset;
use super::table::{Table, TableFormat};

/// One slide per staining, `scans` scans per slide, files under `/slides/<pa>`.
pub fn slides_cell(pa: &str, stainings: &[(&str, usize)]) -> JsonValue {
    let slides: Vec<JsonValue> = stainings
        .iter()
        .enumerate()
        .map(|(block, (staining, scans))| {
            let scans: Vec<JsonValue> = (0..*scans)
                .map(|i| {
                    let name = format!("{pa}-{block}-{i}");
                    json!({
                        "base_dir": format!("/slides/{pa}"),
                        "files": { "THUMBNAIL": [format!("{name}.png")], "SLIDE": [format!("{name}.dcm")] }
                    })
                })
                .collect();
            json!({ "pa_number": pa, "specimen_nr": "I", "block": (block + 1).to_string(),
                    "staining": staining, "scan": scans })
        })
        .collect();
    json!({ "slides": slides })
}

/// A dataset with one H&E slide per specimen holding `scans[i]` scans.
pub fn dataset(scans: &[usize]) -> Dataset {
    let rows: Vec<Vec<(&str, usize)>> = scans.iter().map(|&n| vec![("H&E", n)]).collect();
    dataset_with_stainings(&rows)
}

/// A dataset whose specimens carry the given (staining, scan count) slides.
pub fn dataset_with_stainings(specimens: &[Vec<(&str, usize)>]) -> Dataset {
    let mut table = Table::new(
        vec!["description".into(), "slides".into()],
        TableFormat::JsonRecords,
    );
    for (i, stainings) in specimens.iter().enumerate() {
        let pa = format!("T{i}");
        table.push_row(
            i.to_string(),
            vec![json!(format!("specimen {i}")), slides_cell(&pa, stainings)],
        );
    }
    Dataset::from_table(table, &StainClassifier::default()).expect("fixture rows are valid")
}
