use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{PathBuf, MAIN_SEPARATOR};

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use super::filter::StainClassifier;
use super::sorting;
use super::table::Table;

/// File-kind tag for low magnification previews.
pub const THUMBNAIL: &str = "THUMBNAIL";
/// File-kind tag for the whole-slide image file(s).
pub const SLIDE: &str = "SLIDE";
/// Flag written on selections the user did not make by hand.
pub const AUTO_SELECTED_FLAG: &str = "automatically selected";

// ---------------------------------------------------------------------------
// Errors raised while turning table rows into records
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("row {row}: missing required key '{key}' in {context}")]
    MissingKey {
        row: usize,
        key: &'static str,
        context: String,
    },

    #[error("row {row}: {message}")]
    InvalidRow { row: usize, message: String },

    #[error("row {row}: slides belong to different PA numbers ({found})")]
    MixedPaNumbers { row: usize, found: String },
}

// ---------------------------------------------------------------------------
// StainClass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StainClass {
    /// Haematoxylin and eosin.
    He,
    /// Immunohistochemistry (anything not recognised as H&E).
    Ihc,
}

impl StainClass {
    /// Flag stored on exported scans.
    pub fn flag(self) -> &'static str {
        match self {
            StainClass::He => "HE",
            StainClass::Ihc => "IHC",
        }
    }
}

// ---------------------------------------------------------------------------
// SlideInfo / ScanGroup
// ---------------------------------------------------------------------------

/// Metadata of one physical slide.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideInfo {
    pub pa_number: String,
    /// Specimen number in display form (roman numeral when numeric).
    pub specimen_nr: String,
    pub block: String,
    pub staining: String,
    pub stain: StainClass,
    /// All slide keys except `scan`, verbatim and in source order.
    pub fields: Map<String, JsonValue>,
}

/// One digitization of a slide: a base directory plus files grouped by kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanGroup {
    /// Index into [`SpecimenRecord::slides`].
    pub slide: usize,
    pub base_dir: PathBuf,
    /// File-kind tag → file names relative to `base_dir`.
    pub files: BTreeMap<String, Vec<String>>,
    /// The scan object as read, used for export and for matching.
    pub raw: Map<String, JsonValue>,
}

impl ScanGroup {
    /// Paths of all files of one kind, in source order.
    pub fn paths(&self, kind: &str) -> Vec<PathBuf> {
        self.files
            .get(kind)
            .map(|names| names.iter().map(|n| self.base_dir.join(n)).collect())
            .unwrap_or_default()
    }

    /// Slide image files, sorted by name.
    pub fn slide_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.paths(SLIDE);
        paths.sort();
        paths
    }

    /// The first thumbnail file, if the scan has one.
    pub fn thumbnail_path(&self) -> Option<PathBuf> {
        self.paths(THUMBNAIL).into_iter().next()
    }

    /// Whether the input already states if this scan is selected.
    pub fn decided(&self) -> bool {
        self.raw.get("selected").is_some_and(JsonValue::is_boolean)
    }

    /// Whether `other` describes the same files (used to restore selections).
    pub fn same_files(&self, other: &Map<String, JsonValue>) -> bool {
        self.raw.get("base_dir") == other.get("base_dir")
            && self.raw.get("files") == other.get("files")
    }
}

/// Split an archive directory on both `/` and `\` so paths written on
/// either OS resolve locally.
pub fn split_base_dir(base_dir: &str) -> PathBuf {
    let mut path = PathBuf::new();
    if base_dir.starts_with('/') {
        path.push("/");
    }
    for part in base_dir.split(['/', '\\']).filter(|p| !p.is_empty()) {
        if part.ends_with(':') {
            // Drive letter: keep it absolute.
            path.push(format!("{part}{MAIN_SEPARATOR}"));
        } else {
            path.push(part);
        }
    }
    path
}

// ---------------------------------------------------------------------------
// Selection / ScanRef
// ---------------------------------------------------------------------------

/// A selected scan of one specimen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Index into [`SpecimenRecord::scans`].
    pub scan: usize,
    /// Rank given while ranking mode was on.
    pub score: Option<u32>,
    /// Selected by default rather than by the user.
    pub automatic: bool,
}

/// Reference to one scan of one specimen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanRef {
    pub specimen: usize,
    pub scan: usize,
}

impl fmt::Display for ScanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "specimen {} scan {}", self.specimen, self.scan)
    }
}

// ---------------------------------------------------------------------------
// SpecimenRecord – one row of the input table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SpecimenRecord {
    pub description: String,
    /// Shared PA number of all slides (`None` when there are no slides).
    pub pa_number: Option<String>,
    /// Slides in presentation order.
    pub slides: Vec<SlideInfo>,
    /// Scans of all slides, slide by slide.
    pub scans: Vec<ScanGroup>,
    pub selection: Vec<Selection>,
    pub comment: String,
}

impl SpecimenRecord {
    pub fn slide_of(&self, scan: usize) -> Option<&SlideInfo> {
        self.scans.get(scan).and_then(|s| self.slides.get(s.slide))
    }

    pub fn specimen_numbers(&self) -> String {
        sorting::specimen_numbers(&self.slides)
    }

    /// `"{pa_number}-{specimen numbers}"`, the title shown for a case.
    pub fn case_label(&self) -> String {
        format!(
            "{}-{}",
            self.pa_number.as_deref().unwrap_or("?"),
            self.specimen_numbers()
        )
    }

    pub fn is_selected(&self, scan: usize) -> bool {
        self.selection.iter().any(|s| s.scan == scan)
    }

    pub fn score_of(&self, scan: usize) -> Option<u32> {
        self.selection
            .iter()
            .find(|s| s.scan == scan)
            .and_then(|s| s.score)
    }

    /// Whether any selection was made by hand.
    pub fn has_manual_selection(&self) -> bool {
        self.selection.iter().any(|s| !s.automatic)
    }

    /// Number of IHC scans on slides with the same specimen number and block.
    pub fn ihc_count(&self, scan: usize) -> usize {
        let Some(target) = self.slide_of(scan) else {
            return 0;
        };
        (0..self.scans.len())
            .filter_map(|i| self.slide_of(i))
            .filter(|s| {
                s.stain == StainClass::Ihc
                    && s.specimen_nr == target.specimen_nr
                    && s.block == target.block
            })
            .count()
    }
}

// ---------------------------------------------------------------------------
// Dataset – the complete loaded table
// ---------------------------------------------------------------------------

/// The source table plus one typed record per row.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub table: Table,
    pub records: Vec<SpecimenRecord>,
    /// File the table was read from, if any.
    pub source: Option<PathBuf>,
}

impl Dataset {
    /// Validate every row of `table` and build its records.
    pub fn from_table(table: Table, classifier: &StainClassifier) -> Result<Self, DatasetError> {
        let records = super::parse::parse_records(&table, classifier)?;
        Ok(Dataset {
            table,
            records,
            source: None,
        })
    }

    /// Number of specimens.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every staining name in the dataset.
    pub fn stainings(&self) -> BTreeSet<String> {
        self.records
            .iter()
            .flat_map(|r| r.slides.iter().map(|s| s.staining.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_dir_splits_on_both_separators() {
        let path = split_base_dir("data\\archive/2023");
        assert_eq!(path, PathBuf::from("data").join("archive").join("2023"));
    }

    #[test]
    fn absolute_base_dir_stays_absolute() {
        let path = split_base_dir("/mnt/slides//batch1/");
        assert!(path.is_absolute());
        assert_eq!(path, PathBuf::from("/mnt/slides/batch1"));
    }
}
