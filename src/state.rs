use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::color::StainColors;
use crate::config::AppConfig;
use crate::data::export::save_file;
use crate::data::filter::{visible_scans, StainClassifier};
use crate::data::loader::load_file;
use crate::data::model::{Dataset, ScanRef, SpecimenRecord};
use crate::imaging::cache::ImageCache;
use crate::imaging::decode::FileDecoder;
use crate::imaging::loader::{ImageKey, ImageLoader, Lane};
use crate::imaging::viewport::ViewTransform;
use crate::imaging::{DecodeRequest, ImageSource, Resolution};
use crate::session::{SelectionSession, SessionOptions};

// ---------------------------------------------------------------------------
// User intents
// ---------------------------------------------------------------------------

/// Everything the UI can ask for. Widgets emit actions; only
/// [`AppState::dispatch`] mutates the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Next,
    Previous,
    /// Left click on a scan button of the current specimen.
    ToggleScan(usize),
    /// Show a scan in the viewer without changing the selection.
    ShowScan(usize),
    SetComment(String),
    ToggleOnlyHe,
    ToggleRanking,
    ResetView,
    Open(PathBuf),
    Save,
    SaveAs(PathBuf),
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
pub struct AppState {
    pub config: AppConfig,

    /// Active session (None until a dataset is opened).
    pub session: Option<SelectionSession>,

    /// Where the selection is written.
    pub output_path: Option<PathBuf>,

    /// Scan of the current specimen shown in the viewer.
    pub shown_scan: Option<usize>,

    /// Hide IHC scans.
    pub only_he: bool,

    pub view: ViewTransform,
    pub colors: StainColors,
    pub loader: ImageLoader,
    pub cache: ImageCache,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,

    /// Changes since the last successful save.
    pub dirty: bool,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self::with_source(config, Arc::new(FileDecoder))
    }

    pub fn with_source(config: AppConfig, source: Arc<dyn ImageSource>) -> Self {
        let loader = ImageLoader::new(source, config.loader.workers);
        Self {
            config,
            session: None,
            output_path: None,
            shown_scan: None,
            only_he: false,
            view: ViewTransform::default(),
            colors: StainColors::default(),
            loader,
            cache: ImageCache::default(),
            status_message: None,
            dirty: false,
        }
    }

    /// Load a dataset file and start a session on it.
    pub fn open(&mut self, path: &Path) -> Result<()> {
        let classifier = StainClassifier::new(&self.config.he_keywords);
        let dataset = load_file(path, &classifier)?;
        log::info!(
            "Loaded {} specimens ({} stainings) from {}",
            dataset.len(),
            dataset.stainings().len(),
            path.display()
        );
        let output = self.config.output_for(path);
        self.start(dataset, output)
    }

    /// Start a session on an already loaded dataset.
    pub fn start(&mut self, dataset: Dataset, output: PathBuf) -> Result<()> {
        self.colors = StainColors::new(&dataset.stainings());
        let session = SelectionSession::new(dataset, &SessionOptions::from(&self.config))
            .context("starting selection session")?;
        self.session = Some(session);
        self.output_path = Some(output);
        self.status_message = None;
        self.dirty = false;
        self.cache.clear();
        self.entered_specimen();
        Ok(())
    }

    pub fn current(&self) -> Option<&SpecimenRecord> {
        self.session.as_ref().map(SelectionSession::current)
    }

    /// Scans of the current specimen that are listed, in order.
    pub fn visible_scans(&self) -> Vec<usize> {
        self.current()
            .map(|record| visible_scans(record, self.only_he))
            .unwrap_or_default()
    }

    // -- Dispatch --

    pub fn dispatch(&mut self, action: Action) {
        match action {
            Action::Next => self.navigate(SelectionSession::next),
            Action::Previous => self.navigate(SelectionSession::previous),
            Action::ToggleScan(scan) => self.toggle_scan(scan),
            Action::ShowScan(scan) => self.show_scan(Some(scan)),
            Action::SetComment(text) => {
                if let Some(session) = &mut self.session {
                    if session.current().comment != text {
                        session.set_comment(&text);
                        self.dirty = true;
                    }
                }
            }
            Action::ToggleOnlyHe => {
                self.only_he = !self.only_he;
                let visible = self.visible_scans();
                if self.shown_scan.is_some_and(|s| !visible.contains(&s)) {
                    self.show_scan(visible.first().copied());
                }
            }
            Action::ToggleRanking => {
                if let Some(session) = &mut self.session {
                    let ranking = !session.ranking();
                    session.set_ranking(ranking);
                }
            }
            Action::ResetView => self.view.reset(),
            Action::Open(path) => {
                if let Err(err) = self.open(&path) {
                    log::error!("Failed to load {}: {err:#}", path.display());
                    self.status_message = Some(format!("Error: {err:#}"));
                }
            }
            Action::Save => self.save_reporting(),
            Action::SaveAs(path) => {
                self.output_path = Some(path);
                self.save_reporting();
            }
        }
    }

    fn navigate(&mut self, step: fn(&mut SelectionSession) -> bool) {
        let Some(session) = &mut self.session else {
            return;
        };
        if !step(session) {
            return;
        }
        if self.config.autosave {
            self.save_reporting();
        }
        self.entered_specimen();
    }

    fn toggle_scan(&mut self, scan: usize) {
        let Some(session) = &mut self.session else {
            return;
        };
        let target = ScanRef {
            specimen: session.current_index(),
            scan,
        };
        match session.toggle_scan(target) {
            Ok(_) => {
                self.dirty = true;
                self.status_message = None;
                self.show_scan(Some(scan));
            }
            Err(err) => {
                log::info!("Selection rejected: {err}");
                self.status_message = Some(err.to_string());
            }
        }
    }

    fn show_scan(&mut self, scan: Option<usize>) {
        if self.shown_scan == scan {
            return;
        }
        self.shown_scan = scan;
        self.view.reset();
        self.loader.advance(Lane::View);
        self.cache.drop_pending(Resolution::Slide);
    }

    /// Reset per-specimen view state after the current specimen changed.
    fn entered_specimen(&mut self) {
        self.loader.advance(Lane::Prefetch);
        self.loader.advance(Lane::View);
        self.cache.drop_pending(Resolution::Thumbnail);
        self.cache.drop_pending(Resolution::Slide);

        let Some(session) = &self.session else {
            return;
        };
        let buffer = &self.config.loader;
        let window = session.window(buffer.buffer_before, buffer.buffer_after);
        self.cache.retain_specimens(&window);

        let record = session.current();
        let visible = visible_scans(record, self.only_he);
        self.shown_scan = record
            .selection
            .iter()
            .map(|s| s.scan)
            .find(|s| visible.contains(s))
            .or_else(|| visible.first().copied());
        self.view.reset();
    }

    // -- Images --

    /// Queue thumbnails around the current specimen and the shown slide.
    /// Already cached or pending images are not requested again.
    pub fn request_images(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        let settings = &self.config.loader;

        for specimen in session.window(settings.buffer_before, settings.buffer_after) {
            let record = &session.dataset().records[specimen];
            for (scan, group) in record.scans.iter().enumerate() {
                let Some(thumbnail) = group.thumbnail_path() else {
                    continue;
                };
                let key = ImageKey {
                    specimen,
                    scan,
                    resolution: Resolution::Thumbnail,
                };
                if self.cache.contains(&key) {
                    continue;
                }
                let request = DecodeRequest {
                    resolution: Resolution::Thumbnail,
                    paths: vec![thumbnail],
                    max_dim: settings.thumbnail_max_dim,
                    max_pixels: u64::MAX,
                };
                let generation = self.loader.request(key, request);
                self.cache.mark_pending(key, generation);
            }
        }

        let Some(scan) = self.shown_scan.filter(|_| settings.load_slide_images) else {
            return;
        };
        let specimen = session.current_index();
        let Some(group) = session.current().scans.get(scan) else {
            return;
        };
        let key = ImageKey {
            specimen,
            scan,
            resolution: Resolution::Slide,
        };
        if !self.cache.contains(&key) {
            let request = DecodeRequest {
                resolution: Resolution::Slide,
                paths: group.slide_paths(),
                max_dim: settings.slide_max_dim,
                max_pixels: settings.slide_max_pixels,
            };
            let generation = self.loader.request(key, request);
            self.cache.mark_pending(key, generation);
        }
    }

    /// Move finished decodes into the cache. Returns whether anything changed.
    pub fn poll_images(&mut self) -> bool {
        let mut changed = false;
        for event in self.loader.poll() {
            changed |= self.cache.apply(event);
        }
        changed
    }

    // -- Saving --

    pub fn save(&mut self) -> Result<PathBuf> {
        let (Some(session), Some(path)) = (&self.session, &self.output_path) else {
            anyhow::bail!("nothing to save");
        };
        save_file(&session.export(), path)
            .with_context(|| format!("saving selection to {}", path.display()))?;
        log::info!("Saved selection to {}", path.display());
        self.dirty = false;
        Ok(path.clone())
    }

    fn save_reporting(&mut self) {
        if self.session.is_none() {
            return;
        }
        match self.save() {
            Ok(path) => self.status_message = Some(format!("Saved {}", path.display())),
            Err(err) => {
                log::error!("{err:#}");
                self.status_message = Some(format!("Error: {err:#}"));
            }
        }
    }

    /// Final save when the window closes.
    pub fn on_exit(&mut self) {
        if self.config.autosave && self.dirty {
            self.save_reporting();
        }
    }
}
