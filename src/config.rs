use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Settings file
// ---------------------------------------------------------------------------

/// Settings read from an optional TOML file. Every key has a default.
///
/// ```toml
/// max_selected = 2
/// selected_indices = [0, 4, 9]
///
/// [loader]
/// workers = 4
///
/// [viewer]
/// reverse_zoom = true
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Where results are written (format by extension).
    pub output_path: Option<PathBuf>,
    /// First specimen shown.
    pub starting_index: Option<usize>,
    /// Restrict navigation to these rows.
    pub selected_indices: Option<Vec<usize>>,
    /// Selection limit per specimen.
    pub max_selected: usize,
    /// Preselect every scan; lifts `max_selected`.
    pub select_by_default: bool,
    /// Whether IHC scans can be selected.
    pub select_non_he: bool,
    /// Substrings marking a staining as H&E.
    pub he_keywords: Vec<String>,
    /// Write results on every navigation and on close.
    pub autosave: bool,
    /// Preselect scans by staining when a dataset is opened.
    pub autoselect: Option<AutoSelectConfig>,
    pub loader: LoaderConfig,
    pub viewer: ViewerConfig,
    pub ui: UiConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_path: None,
            starting_index: None,
            selected_indices: None,
            max_selected: 1,
            select_by_default: false,
            select_non_he: true,
            he_keywords: vec!["he".to_string(), "h&e".to_string()],
            autosave: true,
            autoselect: None,
            loader: LoaderConfig::default(),
            viewer: ViewerConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

/// `[autoselect]` table.
///
/// ```toml
/// [autoselect]
/// stainings = ["h&e"]
/// first_only = true
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoSelectConfig {
    /// Substrings (any case) of the stainings to preselect.
    pub stainings: Vec<String>,
    /// Preselect only the first matching scan of each specimen.
    #[serde(default)]
    pub first_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Decode threads.
    pub workers: usize,
    /// Longest edge of decoded thumbnails (px).
    pub thumbnail_max_dim: u32,
    /// Longest edge of decoded slide levels (px).
    pub slide_max_dim: u32,
    /// Largest pyramid level (in pixels) that will be decoded.
    pub slide_max_pixels: u64,
    /// Decode a slide level for the displayed scan.
    pub load_slide_images: bool,
    /// Specimens before the current one whose thumbnails are kept.
    pub buffer_before: usize,
    /// Specimens after the current one whose thumbnails are prefetched.
    pub buffer_after: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            thumbnail_max_dim: 1024,
            slide_max_dim: 4096,
            slide_max_pixels: 4096 * 4096,
            load_slide_images: true,
            buffer_before: 1,
            buffer_after: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewerConfig {
    pub min_zoom: f32,
    pub max_zoom: f32,
    /// Scroll down zooms in.
    pub reverse_zoom: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            min_zoom: 0.5,
            max_zoom: 32.0,
            reverse_zoom: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UiConfig {
    /// Edge length of a scan button (px).
    pub button_size: f32,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { button_size: 150.0 }
    }
}

impl AppConfig {
    /// Read and validate a TOML settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig = toml::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_selected == 0 {
            bail!("max_selected must be at least 1");
        }
        if self.loader.workers == 0 {
            bail!("loader.workers must be at least 1");
        }
        if self.loader.thumbnail_max_dim == 0 || self.loader.slide_max_dim == 0 {
            bail!("loader image dimensions must be positive");
        }
        let ViewerConfig {
            min_zoom, max_zoom, ..
        } = self.viewer;
        if !(min_zoom > 0.0 && min_zoom <= 1.0 && max_zoom >= 1.0) {
            bail!("viewer zoom bounds must satisfy 0 < min_zoom <= 1 <= max_zoom (got {min_zoom}..{max_zoom})");
        }
        if self
            .autoselect
            .as_ref()
            .is_some_and(|a| a.stainings.iter().all(|k| k.trim().is_empty()))
        {
            bail!("autoselect.stainings needs at least one staining");
        }
        if self.ui.button_size < 16.0 {
            bail!("ui.button_size must be at least 16");
        }
        Ok(())
    }

    /// Output path: configured, else `<dataset>_selection.<ext>` beside the input.
    pub fn output_for(&self, dataset: &Path) -> PathBuf {
        if let Some(path) = &self.output_path {
            return path.clone();
        }
        let stem = dataset
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset");
        let ext = dataset.extension().and_then(|e| e.to_str()).unwrap_or("json");
        dataset.with_file_name(format!("{stem}_selection.{ext}"))
    }
}

// ---------------------------------------------------------------------------
// Launch arguments
// ---------------------------------------------------------------------------

/// `slide-selector [DATASET] [--config FILE] [--output FILE]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchArgs {
    pub dataset: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl LaunchArgs {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut parsed = LaunchArgs::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let value = iter.next().context("--config needs a file")?;
                    parsed.config = Some(PathBuf::from(value));
                }
                "--output" | "-o" => {
                    let value = iter.next().context("--output needs a file")?;
                    parsed.output = Some(PathBuf::from(value));
                }
                flag if flag.starts_with('-') => bail!("unknown option {flag}"),
                path => {
                    if parsed.dataset.is_some() {
                        bail!("only one dataset can be opened (extra argument {path})");
                    }
                    parsed.dataset = Some(PathBuf::from(path));
                }
            }
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            "max_selected = 3\n[viewer]\nreverse_zoom = true\n[loader]\nbuffer_after = 2\n",
        )
        .expect("config should parse");
        assert_eq!(config.max_selected, 3);
        assert!(config.viewer.reverse_zoom);
        assert_eq!(config.viewer.max_zoom, 32.0);
        assert_eq!(config.loader.buffer_after, 2);
        assert_eq!(config.loader.workers, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn autoselect_table_is_optional_and_validated() {
        assert!(AppConfig::default().autoselect.is_none());

        let config: AppConfig =
            toml::from_str("[autoselect]\nstainings = [\"H&E\"]\n").expect("config should parse");
        let autoselect = config.autoselect.as_ref().expect("table present");
        assert_eq!(autoselect.stainings, vec!["H&E"]);
        assert!(!autoselect.first_only);
        assert!(config.validate().is_ok());

        let empty: AppConfig =
            toml::from_str("[autoselect]\nstainings = []\n").expect("config should parse");
        assert!(empty.validate().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<AppConfig>("max_selectd = 3\n").is_err());
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut config = AppConfig::default();
        config.max_selected = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.viewer.min_zoom = 2.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.loader.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_output_sits_beside_the_dataset() {
        let config = AppConfig::default();
        assert_eq!(
            config.output_for(Path::new("/data/cases.parquet")),
            PathBuf::from("/data/cases_selection.parquet")
        );
    }

    #[test]
    fn launch_args_parse_flags_and_dataset() {
        let parsed = LaunchArgs::parse(&args(&["cases.json", "--config", "sel.toml", "-o", "out.csv"]))
            .expect("args should parse");
        assert_eq!(parsed.dataset, Some(PathBuf::from("cases.json")));
        assert_eq!(parsed.config, Some(PathBuf::from("sel.toml")));
        assert_eq!(parsed.output, Some(PathBuf::from("out.csv")));

        assert!(LaunchArgs::parse(&args(&["--config"])).is_err());
        assert!(LaunchArgs::parse(&args(&["a.json", "b.json"])).is_err());
        assert!(LaunchArgs::parse(&args(&["--verbose"])).is_err());
    }
}
