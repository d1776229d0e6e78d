//! Image pipeline for the viewer and the scan buttons.
//!
//! ```text
//!   DecodeRequest ──► ImageLoader (worker pool) ──► ImageSource::decode
//!                          │
//!                          ▼
//!                     LoadEvent ──► ImageCache ──► egui texture
//! ```

pub mod cache;
pub mod decode;
pub mod dicom;
pub mod loader;
pub mod viewport;

use std::path::PathBuf;

use eframe::egui::ColorImage;
use thiserror::Error;

/// Which image of a scan is wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resolution {
    /// Small preview used on scan buttons.
    Thumbnail,
    /// A medium magnification level for the viewer.
    Slide,
}

/// Everything a worker needs to produce one image.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeRequest {
    pub resolution: Resolution,
    pub paths: Vec<PathBuf>,
    /// Longest edge of the result.
    pub max_dim: u32,
    /// Largest source level that may be decoded.
    pub max_pixels: u64,
}

/// An 8-bit RGB image ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
    /// Most common border colour, painted behind the image.
    pub background: [u8; 3],
}

impl DecodedImage {
    pub fn to_color_image(&self) -> ColorImage {
        ColorImage::from_rgb([self.width as usize, self.height as usize], &self.rgb)
    }

    pub fn meta(&self) -> ImageMeta {
        ImageMeta {
            width: self.width,
            height: self.height,
            background: self.background,
        }
    }
}

/// What is left of a decoded image once its pixels live on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    pub background: [u8; 3],
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no image files for this scan")]
    NoFiles,

    #[error("file not found: {0}")]
    Missing(PathBuf),

    #[error("unsupported slide format: {0}")]
    Unsupported(PathBuf),

    #[error("no pyramid level fits within {budget} pixels")]
    NoLevelWithinBudget { budget: u64 },

    #[error("decoding {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("reading DICOM {path}: {message}")]
    Dicom { path: PathBuf, message: String },
}

/// Anything that can turn a request into pixels. Runs on worker threads.
pub trait ImageSource: Send + Sync {
    fn decode(&self, request: &DecodeRequest) -> Result<DecodedImage, DecodeError>;
}
