use super::model::{SpecimenRecord, StainClass};

// ---------------------------------------------------------------------------
// Staining classification
// ---------------------------------------------------------------------------

/// Decides whether a staining name denotes H&E.
///
/// A staining is H&E when its lowercase name contains any keyword.
#[derive(Debug, Clone)]
pub struct StainClassifier {
    keywords: Vec<String>,
}

impl Default for StainClassifier {
    fn default() -> Self {
        Self::new(&["he".to_string(), "h&e".to_string()])
    }
}

impl StainClassifier {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    pub fn classify(&self, staining: &str) -> StainClass {
        let lower = staining.to_lowercase();
        if self.keywords.iter().any(|k| lower.contains(k.as_str())) {
            StainClass::He
        } else {
            StainClass::Ihc
        }
    }
}

// ---------------------------------------------------------------------------
// Scan visibility
// ---------------------------------------------------------------------------

/// Indices of the scans shown for `record`.
///
/// With `only_he` set, scans on IHC slides are hidden; otherwise every scan
/// is visible.
pub fn visible_scans(record: &SpecimenRecord, only_he: bool) -> Vec<usize> {
    (0..record.scans.len())
        .filter(|&i| {
            !only_he
                || record
                    .slide_of(i)
                    .is_some_and(|slide| slide.stain == StainClass::He)
        })
        .collect()
}
