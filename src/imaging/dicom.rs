//! DICOM whole-slide pyramids: one file per level, each level stored as
//! tiles (one frame per tile, row-major).

use std::fmt::Display;
use std::path::{Path, PathBuf};

use dicom_object::{open_file, DefaultDicomObject, OpenFileOptions, Tag};
use dicom_pixeldata::PixelDecoder;
use image::{Rgb, RgbImage};

use super::DecodeError;

const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

/// Image types that are not part of the pyramid.
const NON_PYRAMID_TYPES: &[&str] = &["LABEL", "OVERVIEW"];

/// Geometry of one pyramid level, read from its header.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Level {
    path: PathBuf,
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    frames: u32,
}

impl Level {
    fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    fn tiles_across(&self) -> u32 {
        self.width.div_ceil(self.tile_width.max(1))
    }

    /// Top-left corner of frame `index` in the stitched level.
    fn tile_origin(&self, index: u32) -> (u32, u32) {
        let across = self.tiles_across().max(1);
        (
            (index % across) * self.tile_width,
            (index / across) * self.tile_height,
        )
    }
}

fn dicom_error(path: &Path, err: impl Display) -> DecodeError {
    DecodeError::Dicom {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn read_u32(obj: &DefaultDicomObject, name: &str) -> Option<u32> {
    obj.element_by_name(name)
        .ok()
        .and_then(|el| el.to_str().ok())
        .and_then(|v| v.split('\\').next()?.trim().parse().ok())
}

/// Header of one file, or `None` for labels and overviews.
fn read_level(path: &Path) -> Result<Option<Level>, DecodeError> {
    let obj = OpenFileOptions::new()
        .read_until(PIXEL_DATA)
        .open_file(path)
        .map_err(|e| dicom_error(path, e))?;

    let image_type = obj
        .element_by_name("ImageType")
        .ok()
        .and_then(|el| el.to_str().ok())
        .map(|v| v.to_ascii_uppercase())
        .unwrap_or_default();
    if image_type
        .split('\\')
        .any(|t| NON_PYRAMID_TYPES.contains(&t.trim()))
    {
        return Ok(None);
    }

    let tile_width = read_u32(&obj, "Columns").ok_or_else(|| dicom_error(path, "missing Columns"))?;
    let tile_height = read_u32(&obj, "Rows").ok_or_else(|| dicom_error(path, "missing Rows"))?;
    Ok(Some(Level {
        path: path.to_path_buf(),
        width: read_u32(&obj, "TotalPixelMatrixColumns").unwrap_or(tile_width),
        height: read_u32(&obj, "TotalPixelMatrixRows").unwrap_or(tile_height),
        tile_width,
        tile_height,
        frames: read_u32(&obj, "NumberOfFrames").unwrap_or(1).max(1),
    }))
}

/// The most detailed level that fits the pixel budget.
fn choose_level(levels: &[Level], max_pixels: u64) -> Option<&Level> {
    levels
        .iter()
        .filter(|l| l.pixels() <= max_pixels)
        .max_by_key(|l| l.pixels())
}

/// Decode the largest pyramid level within `max_pixels` into one image.
pub fn decode_level(paths: &[&Path], max_pixels: u64) -> Result<RgbImage, DecodeError> {
    let mut levels = Vec::new();
    for path in paths {
        if let Some(level) = read_level(path)? {
            levels.push(level);
        }
    }
    let level = choose_level(&levels, max_pixels)
        .ok_or(DecodeError::NoLevelWithinBudget { budget: max_pixels })?;
    log::debug!(
        "decoding {}×{} level from {}",
        level.width,
        level.height,
        level.path.display()
    );

    let obj = open_file(&level.path).map_err(|e| dicom_error(&level.path, e))?;
    let mut canvas = RgbImage::from_pixel(level.width, level.height, Rgb([255, 255, 255]));
    for frame in 0..level.frames {
        let decoded = obj
            .decode_pixel_data_frame(frame)
            .map_err(|e| dicom_error(&level.path, e))?;
        if decoded.bits_allocated() != 8 {
            return Err(dicom_error(
                &level.path,
                format!("BitsAllocated={} is not supported", decoded.bits_allocated()),
            ));
        }
        let samples: Vec<u8> = decoded
            .to_vec_frame(0)
            .map_err(|e| dicom_error(&level.path, e))?;
        let spp = usize::from(decoded.samples_per_pixel());
        let (tw, th) = (decoded.columns(), decoded.rows());
        let (x0, y0) = level.tile_origin(frame);

        for y in 0..th {
            for x in 0..tw {
                let (cx, cy) = (x0 + x, y0 + y);
                if cx >= level.width || cy >= level.height {
                    continue;
                }
                let i = (y as usize * tw as usize + x as usize) * spp;
                let pixel = match (spp, samples.get(i..i + spp)) {
                    (1, Some(&[v])) => Rgb([v, v, v]),
                    (_, Some(&[r, g, b, ..])) => Rgb([r, g, b]),
                    _ => continue,
                };
                canvas.put_pixel(cx, cy, pixel);
            }
        }
    }
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(width: u32, height: u32) -> Level {
        Level {
            path: PathBuf::from(format!("level-{width}.dcm")),
            width,
            height,
            tile_width: 256,
            tile_height: 256,
            frames: width.div_ceil(256) * height.div_ceil(256),
        }
    }

    #[test]
    fn largest_level_within_budget_is_chosen() {
        let levels = vec![level(40_000, 30_000), level(2_500, 1_875), level(10_000, 7_500)];
        let chosen = choose_level(&levels, 4096 * 4096).expect("a level fits");
        assert_eq!(chosen.width, 2_500);
        assert!(choose_level(&levels, 1_000).is_none());
    }

    #[test]
    fn tiles_are_laid_out_row_major() {
        let l = level(600, 300);
        assert_eq!(l.tiles_across(), 3);
        assert_eq!(l.tile_origin(0), (0, 0));
        assert_eq!(l.tile_origin(2), (512, 0));
        assert_eq!(l.tile_origin(4), (256, 256));
    }

    #[test]
    fn non_dicom_file_reports_a_dicom_error() {
        let path = std::env::temp_dir().join(format!(
            "slide-selector-{}-not-dicom.dcm",
            std::process::id()
        ));
        std::fs::write(&path, b"plain text").expect("should write file");

        let err = decode_level(&[path.as_path()], u64::MAX).unwrap_err();
        assert!(matches!(err, DecodeError::Dicom { .. }), "{err}");

        let _ = std::fs::remove_file(path);
    }
}
