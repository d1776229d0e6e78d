//! Selection state machine: which specimen is shown, which of its scans
//! are selected, and the comment attached to it.
//!
//! Every transition is written straight into the [`Dataset`] records, so the
//! dataset is always the source of truth for export.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{AppConfig, AutoSelectConfig};
use crate::data::export::SELECTED_SCANS_COLUMN;
use crate::data::model::{Dataset, ScanRef, Selection, SpecimenRecord, StainClass};
use crate::data::table::Table;

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// A rejected selection change. The session is left untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("{scan} does not belong to the current specimen ({current})")]
    WrongSpecimen { scan: ScanRef, current: usize },

    #[error("{0} does not exist")]
    UnknownScan(ScanRef),

    #[error("at most {limit} scan(s) can be selected per specimen")]
    LimitReached { limit: usize },

    #[error("{0} has a non-H&E staining and cannot be selected")]
    NotSelectable(ScanRef),

    #[error("only the highest ranked selection can be removed ({0})")]
    RankLocked(ScanRef),
}

/// Invalid navigation settings for a dataset.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("the dataset contains no specimens")]
    Empty,

    #[error("index {index} is outside the dataset (0..{len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("starting index {0} is not among the selected indices")]
    StartNotSelected(usize),

    #[error("autoselect gave {found} flag(s) for specimen {specimen} with {expected} scan(s)")]
    AutoSelectLength {
        specimen: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    Selected,
    AlreadySelected,
    /// The single allowed selection moved away from this scan.
    Replaced(usize),
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Chooses scans to preselect when a session starts.
pub trait AutoSelect: Send + Sync + fmt::Debug {
    /// One flag per scan of `record`, in scan order.
    fn choose(&self, record: &SpecimenRecord) -> Vec<bool>;
}

/// Preselects scans whose staining contains one of the keywords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StainingRule {
    keywords: Vec<String>,
    first_only: bool,
}

impl From<&AutoSelectConfig> for StainingRule {
    fn from(config: &AutoSelectConfig) -> Self {
        Self {
            keywords: config
                .stainings
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            first_only: config.first_only,
        }
    }
}

impl AutoSelect for StainingRule {
    fn choose(&self, record: &SpecimenRecord) -> Vec<bool> {
        let mut found = false;
        (0..record.scans.len())
            .map(|scan| {
                let matches = record.slide_of(scan).is_some_and(|slide| {
                    let staining = slide.staining.to_lowercase();
                    self.keywords.iter().any(|k| staining.contains(k.as_str()))
                });
                let pick = matches && !(self.first_only && found);
                found |= pick;
                pick
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub starting_index: Option<usize>,
    pub selected_indices: Option<Vec<usize>>,
    pub max_selected: usize,
    pub select_by_default: bool,
    pub select_non_he: bool,
    pub autoselect: Option<Arc<dyn AutoSelect>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            starting_index: None,
            selected_indices: None,
            max_selected: 1,
            select_by_default: false,
            select_non_he: true,
            autoselect: None,
        }
    }
}

impl From<&AppConfig> for SessionOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            starting_index: config.starting_index,
            selected_indices: config.selected_indices.clone(),
            max_selected: config.max_selected,
            select_by_default: config.select_by_default,
            select_non_he: config.select_non_he,
            autoselect: config
                .autoselect
                .as_ref()
                .map(|a| Arc::new(StainingRule::from(a)) as Arc<dyn AutoSelect>),
        }
    }
}

/// Preselect the scans the input leaves undecided: by the autoselect rule
/// when one is set, otherwise all of them when `select_by_default` is on.
fn preselect(dataset: &mut Dataset, options: &SessionOptions) -> Result<(), SessionError> {
    // A saved selection column decides every scan of its table.
    if dataset.table.column_index(SELECTED_SCANS_COLUMN).is_some() {
        return Ok(());
    }
    for (specimen, record) in dataset.records.iter_mut().enumerate() {
        let expected = record.scans.len();
        let picks = match &options.autoselect {
            Some(rule) => rule.choose(record),
            None => vec![options.select_by_default; expected],
        };
        if picks.len() != expected {
            return Err(SessionError::AutoSelectLength {
                specimen,
                expected,
                found: picks.len(),
            });
        }
        for (scan, pick) in picks.into_iter().enumerate() {
            if pick && !record.scans[scan].decided() && !record.is_selected(scan) {
                record.selection.push(Selection {
                    scan,
                    score: None,
                    automatic: true,
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SelectionSession
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SelectionSession {
    dataset: Dataset,
    /// Navigable specimen indices, ascending.
    order: Vec<usize>,
    /// Position in `order`.
    position: usize,
    max_selected: usize,
    select_non_he: bool,
    ranking: bool,
}

impl SelectionSession {
    pub fn new(mut dataset: Dataset, options: &SessionOptions) -> Result<Self, SessionError> {
        if dataset.is_empty() {
            return Err(SessionError::Empty);
        }
        let len = dataset.len();

        let subset = matches!(options.selected_indices.as_deref(), Some([_, ..]));
        let order = match options.selected_indices.as_deref() {
            None | Some([]) => (0..len).collect(),
            Some(indices) => {
                let mut order = indices.to_vec();
                order.sort_unstable();
                order.dedup();
                if let Some(&index) = order.iter().find(|&&i| i >= len) {
                    return Err(SessionError::IndexOutOfRange { index, len });
                }
                order
            }
        };

        let mut max_selected = options.max_selected.max(1);
        if options.select_by_default {
            log::warn!(
                "selection limit of {} lifted: every scan is selected by default",
                options.max_selected
            );
            max_selected = usize::MAX;
        }
        if options.select_by_default || options.autoselect.is_some() {
            preselect(&mut dataset, options)?;
        }

        let position = match options.starting_index {
            Some(index) if index >= len => {
                return Err(SessionError::IndexOutOfRange { index, len });
            }
            Some(index) => order
                .iter()
                .position(|&i| i == index)
                .ok_or(SessionError::StartNotSelected(index))?,
            None if subset => 0,
            // Resume at the last specimen a user already worked on.
            None => order
                .iter()
                .rposition(|&i| dataset.records[i].has_manual_selection())
                .unwrap_or(0),
        };

        Ok(Self {
            dataset,
            order,
            position,
            max_selected,
            select_non_he: options.select_non_he,
            ranking: false,
        })
    }

    // -- Accessors --

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Number of navigable specimens.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Position within the navigation order.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Dataset index of the current specimen.
    pub fn current_index(&self) -> usize {
        self.order[self.position]
    }

    pub fn current(&self) -> &SpecimenRecord {
        &self.dataset.records[self.current_index()]
    }

    pub fn is_first(&self) -> bool {
        self.position == 0
    }

    pub fn is_last(&self) -> bool {
        self.position + 1 == self.order.len()
    }

    pub fn max_selected(&self) -> usize {
        self.max_selected
    }

    pub fn ranking(&self) -> bool {
        self.ranking
    }

    /// Whether `scan` of the current specimen may be selected at all.
    pub fn selectable(&self, scan: usize) -> bool {
        self.select_non_he
            || self
                .current()
                .slide_of(scan)
                .is_some_and(|s| s.stain == StainClass::He)
    }

    // -- Navigation --

    /// Move to the next specimen. Returns `false` at the end.
    pub fn next(&mut self) -> bool {
        if self.is_last() {
            return false;
        }
        self.position += 1;
        true
    }

    /// Move to the previous specimen. Returns `false` at the start.
    pub fn previous(&mut self) -> bool {
        if self.is_first() {
            return false;
        }
        self.position -= 1;
        true
    }

    /// Dataset indices within `before`/`after` positions of the current one,
    /// nearest first (ties favour the forward direction).
    pub fn window(&self, before: usize, after: usize) -> Vec<usize> {
        let first = self.position.saturating_sub(before);
        let last = (self.position + after).min(self.order.len() - 1);
        let mut positions: Vec<usize> = (first..=last).collect();
        positions.sort_by_key(|&p| (p.abs_diff(self.position), p < self.position));
        positions.into_iter().map(|p| self.order[p]).collect()
    }

    // -- Selection --

    fn check(&self, scan: ScanRef) -> Result<(), SelectionError> {
        let current = self.current_index();
        if scan.specimen != current {
            return Err(SelectionError::WrongSpecimen { scan, current });
        }
        if scan.scan >= self.current().scans.len() {
            return Err(SelectionError::UnknownScan(scan));
        }
        Ok(())
    }

    fn current_mut(&mut self) -> &mut SpecimenRecord {
        let index = self.current_index();
        &mut self.dataset.records[index]
    }

    /// Record `scan` as selected for the current specimen.
    pub fn select_scan(&mut self, scan: ScanRef) -> Result<SelectOutcome, SelectionError> {
        self.check(scan)?;
        if self.current().is_selected(scan.scan) {
            return Ok(SelectOutcome::AlreadySelected);
        }
        if !self.selectable(scan.scan) {
            return Err(SelectionError::NotSelectable(scan));
        }

        let (limit, ranking) = (self.max_selected, self.ranking);
        let record = self.current_mut();
        let mut replaced = None;
        if limit == 1 && !record.selection.is_empty() {
            replaced = record.selection.first().map(|s| s.scan);
            record.selection.clear();
        } else if record.selection.len() >= limit {
            return Err(SelectionError::LimitReached { limit });
        }

        let score = ranking
            .then(|| record.selection.iter().filter_map(|s| s.score).max().unwrap_or(0) + 1);
        record.selection.push(Selection {
            scan: scan.scan,
            score,
            automatic: false,
        });
        Ok(replaced.map_or(SelectOutcome::Selected, SelectOutcome::Replaced))
    }

    /// Remove `scan` from the selection. Returns whether it was selected.
    pub fn deselect_scan(&mut self, scan: ScanRef) -> Result<bool, SelectionError> {
        self.check(scan)?;
        let record = self.current_mut();
        let Some(pos) = record.selection.iter().position(|s| s.scan == scan.scan) else {
            return Ok(false);
        };
        if let Some(score) = record.selection[pos].score {
            let highest = record.selection.iter().filter_map(|s| s.score).max();
            if highest != Some(score) {
                return Err(SelectionError::RankLocked(scan));
            }
        }
        record.selection.remove(pos);
        Ok(true)
    }

    /// Select `scan` when it is not selected, deselect it otherwise.
    /// Returns whether it ends up selected.
    pub fn toggle_scan(&mut self, scan: ScanRef) -> Result<bool, SelectionError> {
        self.check(scan)?;
        if self.current().is_selected(scan.scan) {
            self.deselect_scan(scan).map(|_| false)
        } else {
            self.select_scan(scan).map(|_| true)
        }
    }

    pub fn set_comment(&mut self, text: &str) {
        let record = self.current_mut();
        if record.comment != text {
            record.comment = text.to_string();
        }
    }

    /// New selections receive increasing ranks while ranking is on.
    pub fn set_ranking(&mut self, ranking: bool) {
        self.ranking = ranking;
    }

    /// The output table for the current state.
    pub fn export(&self) -> Table {
        self.dataset.export()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::export::{COMMENTS_COLUMN, SELECTED_SCANS_COLUMN};
    use crate::data::fixtures::{dataset, dataset_with_stainings};
    use serde_json::{json, Value as JsonValue};

    fn session(scans: &[usize]) -> SelectionSession {
        SelectionSession::new(dataset(scans), &SessionOptions::default()).expect("valid session")
    }

    fn scan(session: &SelectionSession, scan: usize) -> ScanRef {
        ScanRef {
            specimen: session.current_index(),
            scan,
        }
    }

    #[test]
    fn navigation_saturates_at_both_ends() {
        let mut s = session(&[1, 1, 1]);
        assert!(!s.previous());
        assert_eq!(s.current_index(), 0);

        assert!(s.next());
        assert!(s.next());
        assert!(!s.next());
        assert_eq!(s.current_index(), 2);
        assert!(s.is_last());
    }

    #[test]
    fn subset_navigation_skips_other_rows() {
        let options = SessionOptions {
            selected_indices: Some(vec![3, 1, 3]),
            ..SessionOptions::default()
        };
        let mut s = SelectionSession::new(dataset(&[1, 1, 1, 1]), &options).expect("valid");
        assert_eq!(s.len(), 2);
        assert_eq!(s.current_index(), 1);
        assert!(s.next());
        assert_eq!(s.current_index(), 3);
        assert!(!s.next());
    }

    #[test]
    fn invalid_navigation_options_are_rejected() {
        assert_eq!(
            SelectionSession::new(dataset(&[]), &SessionOptions::default()).unwrap_err(),
            SessionError::Empty
        );

        let options = SessionOptions {
            starting_index: Some(5),
            ..SessionOptions::default()
        };
        assert_eq!(
            SelectionSession::new(dataset(&[1, 1]), &options).unwrap_err(),
            SessionError::IndexOutOfRange { index: 5, len: 2 }
        );

        let options = SessionOptions {
            starting_index: Some(0),
            selected_indices: Some(vec![1]),
            ..SessionOptions::default()
        };
        assert_eq!(
            SelectionSession::new(dataset(&[1, 1]), &options).unwrap_err(),
            SessionError::StartNotSelected(0)
        );
    }

    #[test]
    fn resumes_at_last_manually_selected_specimen() {
        let mut data = dataset(&[1, 1, 1, 1]);
        data.records[2].selection.push(Selection {
            scan: 0,
            score: None,
            automatic: false,
        });
        data.records[3].selection.push(Selection {
            scan: 0,
            score: None,
            automatic: true,
        });
        let s = SelectionSession::new(data, &SessionOptions::default()).expect("valid");
        assert_eq!(s.current_index(), 2);
    }

    #[test]
    fn selecting_a_scan_changes_only_the_current_specimen() {
        let mut s = session(&[2, 3]);
        assert!(s.next());
        let target = scan(&s, 2);
        assert_eq!(s.select_scan(target), Ok(SelectOutcome::Selected));
        assert_eq!(s.current_index(), 1);

        let out = s.export();
        let picked = out.cell(1, SELECTED_SCANS_COLUMN).expect("column");
        assert_eq!(picked["slides"][0]["scan"][0]["files"]["SLIDE"], json!(["T1-0-2.dcm"]));
        assert_eq!(out.cell(0, SELECTED_SCANS_COLUMN), Some(&JsonValue::Null));
    }

    #[test]
    fn foreign_or_unknown_scans_are_rejected_without_change() {
        let mut s = session(&[2, 2]);
        let foreign = ScanRef {
            specimen: 1,
            scan: 0,
        };
        assert_eq!(
            s.select_scan(foreign),
            Err(SelectionError::WrongSpecimen {
                scan: foreign,
                current: 0
            })
        );
        let missing = scan(&s, 7);
        assert_eq!(s.select_scan(missing), Err(SelectionError::UnknownScan(missing)));
        assert!(s.current().selection.is_empty());
        assert!(s.dataset().records[1].selection.is_empty());
    }

    #[test]
    fn specimen_without_scans_is_navigable_and_exports_null() {
        let mut s = session(&[0, 1]);
        assert_eq!(
            s.select_scan(scan(&s, 0)),
            Err(SelectionError::UnknownScan(scan(&s, 0)))
        );
        assert!(s.next());
        assert_eq!(s.export().cell(0, SELECTED_SCANS_COLUMN), Some(&JsonValue::Null));
    }

    #[test]
    fn single_selection_replaces_the_previous_one() {
        let mut s = session(&[3]);
        s.select_scan(scan(&s, 0)).expect("select");
        assert_eq!(s.select_scan(scan(&s, 2)), Ok(SelectOutcome::Replaced(0)));
        assert_eq!(s.select_scan(scan(&s, 2)), Ok(SelectOutcome::AlreadySelected));
        assert_eq!(s.current().selection.len(), 1);
        assert!(s.current().is_selected(2));
    }

    #[test]
    fn higher_limits_allow_several_and_then_refuse() {
        let options = SessionOptions {
            max_selected: 2,
            ..SessionOptions::default()
        };
        let mut s = SelectionSession::new(dataset(&[3]), &options).expect("valid");
        s.select_scan(scan(&s, 0)).expect("first");
        s.select_scan(scan(&s, 1)).expect("second");
        assert_eq!(
            s.select_scan(scan(&s, 2)),
            Err(SelectionError::LimitReached { limit: 2 })
        );
        assert_eq!(s.current().selection.len(), 2);
    }

    #[test]
    fn toggle_deselects_and_ranking_locks_lower_ranks() {
        let options = SessionOptions {
            max_selected: 3,
            ..SessionOptions::default()
        };
        let mut s = SelectionSession::new(dataset(&[3]), &options).expect("valid");
        s.set_ranking(true);
        assert_eq!(s.toggle_scan(scan(&s, 1)), Ok(true));
        assert_eq!(s.toggle_scan(scan(&s, 0)), Ok(true));
        assert_eq!(s.current().score_of(1), Some(1));
        assert_eq!(s.current().score_of(0), Some(2));

        assert_eq!(
            s.toggle_scan(scan(&s, 1)),
            Err(SelectionError::RankLocked(scan(&s, 1)))
        );
        assert_eq!(s.toggle_scan(scan(&s, 0)), Ok(false));
        assert_eq!(s.toggle_scan(scan(&s, 1)), Ok(false));
        assert!(s.current().selection.is_empty());
    }

    #[test]
    fn ihc_scans_can_be_locked_out() {
        let options = SessionOptions {
            select_non_he: false,
            ..SessionOptions::default()
        };
        let data = dataset_with_stainings(&[vec![("H&E", 1), ("CD20", 1)]]);
        let mut s = SelectionSession::new(data, &options).expect("valid");
        assert!(s.selectable(0));
        assert!(!s.selectable(1));
        assert_eq!(
            s.select_scan(scan(&s, 1)),
            Err(SelectionError::NotSelectable(scan(&s, 1)))
        );
    }

    #[test]
    fn comment_survives_navigation() {
        let mut s = session(&[1, 1]);
        s.set_comment("tissue folded");
        assert!(s.next());
        assert_eq!(s.current().comment, "");
        assert!(s.previous());
        assert_eq!(s.current().comment, "tissue folded");
        assert_eq!(s.export().cell(0, COMMENTS_COLUMN), Some(&json!("tissue folded")));
    }

    #[test]
    fn select_by_default_marks_everything_automatic() {
        let options = SessionOptions {
            select_by_default: true,
            ..SessionOptions::default()
        };
        let s = SelectionSession::new(dataset(&[2, 1]), &options).expect("valid");
        assert_eq!(s.max_selected(), usize::MAX);
        assert_eq!(s.current().selection.len(), 2);
        assert!(s.current().selection.iter().all(|sel| sel.automatic));
        assert!(!s.current().has_manual_selection());
        assert_eq!(s.current_index(), 0);
    }

    #[test]
    fn window_lists_nearest_specimens_first() {
        let mut s = session(&[1, 1, 1, 1, 1, 1]);
        s.next();
        s.next();
        assert_eq!(s.window(1, 2), vec![2, 3, 1, 4]);
        assert_eq!(s.window(5, 0), vec![2, 1, 0]);
    }

    fn he_rule(first_only: bool) -> Arc<dyn AutoSelect> {
        Arc::new(StainingRule::from(&AutoSelectConfig {
            stainings: vec!["he".into(), "h&e".into()],
            first_only,
        }))
    }

    #[test]
    fn autoselect_fills_only_undecided_scans() {
        let mut data = dataset_with_stainings(&[vec![("H&E", 2), ("CD3", 1)]]);
        data.records[0].scans[0]
            .raw
            .insert("selected".into(), JsonValue::Bool(false));
        let options = SessionOptions {
            autoselect: Some(he_rule(false)),
            select_by_default: true,
            ..SessionOptions::default()
        };

        let s = SelectionSession::new(data, &options).expect("valid");
        let picked: Vec<usize> = s.current().selection.iter().map(|sel| sel.scan).collect();
        assert_eq!(picked, vec![1]);
        assert!(s.current().selection[0].automatic);
        assert!(!s.current().has_manual_selection());
    }

    #[test]
    fn autoselect_can_stop_at_the_first_match() {
        let data = dataset_with_stainings(&[vec![("CD20", 1), ("HE", 2)]]);
        let options = SessionOptions {
            autoselect: Some(he_rule(false)),
            ..SessionOptions::default()
        };
        assert_eq!(
            he_rule(true).choose(&data.records[0]),
            vec![false, true, false]
        );
        let s = SelectionSession::new(data, &options).expect("valid");
        assert_eq!(s.current().selection.len(), 2);
        // The limit still applies to manual changes.
        assert_eq!(s.max_selected(), 1);
    }

    #[test]
    fn autoselect_keeps_restored_selections() {
        let mut data = dataset(&[2, 2]);
        data.records[0].selection.push(Selection {
            scan: 1,
            score: None,
            automatic: false,
        });
        let column = vec![JsonValue::Null; data.len()];
        data.table.set_column(SELECTED_SCANS_COLUMN, column);
        let options = SessionOptions {
            autoselect: Some(he_rule(false)),
            ..SessionOptions::default()
        };

        let s = SelectionSession::new(data, &options).expect("valid");
        assert_eq!(s.dataset().records[0].selection.len(), 1);
        assert!(s.dataset().records[1].selection.is_empty());
    }

    #[derive(Debug)]
    struct Fixed(Vec<bool>);

    impl AutoSelect for Fixed {
        fn choose(&self, _record: &SpecimenRecord) -> Vec<bool> {
            self.0.clone()
        }
    }

    #[test]
    fn autoselect_with_wrong_length_is_rejected() {
        let options = SessionOptions {
            autoselect: Some(Arc::new(Fixed(vec![true]))),
            ..SessionOptions::default()
        };
        assert_eq!(
            SelectionSession::new(dataset(&[1, 3]), &options).unwrap_err(),
            SessionError::AutoSelectLength {
                specimen: 1,
                expected: 3,
                found: 1
            }
        );
    }
}
