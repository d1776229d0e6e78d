use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::RgbImage;

use super::{dicom, DecodeError, DecodeRequest, DecodedImage, ImageSource, Resolution};
use crate::data::loader::extension;

const RASTER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff"];

/// Reads images from the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDecoder;

impl ImageSource for FileDecoder {
    fn decode(&self, request: &DecodeRequest) -> Result<DecodedImage, DecodeError> {
        let image = match request.resolution {
            Resolution::Thumbnail => {
                let path = request.paths.first().ok_or(DecodeError::NoFiles)?;
                open_raster(path)?
            }
            Resolution::Slide => decode_slide(&request.paths, request.max_pixels)?,
        };
        Ok(finish(image, request.max_dim))
    }
}

/// Pick the readable representation of a whole-slide scan.
fn decode_slide(paths: &[PathBuf], max_pixels: u64) -> Result<RgbImage, DecodeError> {
    let first = paths.first().ok_or(DecodeError::NoFiles)?;
    if let Some(missing) = paths.iter().find(|p| !p.exists()) {
        return Err(DecodeError::Missing(missing.clone()));
    }

    let levels: Vec<&Path> = paths
        .iter()
        .filter(|p| extension(p) == "dcm")
        .map(PathBuf::as_path)
        .collect();
    if !levels.is_empty() {
        return dicom::decode_level(&levels, max_pixels);
    }

    if RASTER_EXTENSIONS.contains(&extension(first).as_str()) {
        let (width, height) = image::image_dimensions(first).map_err(|source| DecodeError::Image {
            path: first.clone(),
            source,
        })?;
        if u64::from(width) * u64::from(height) > max_pixels {
            return Err(DecodeError::NoLevelWithinBudget { budget: max_pixels });
        }
        return open_raster(first);
    }

    Err(DecodeError::Unsupported(first.clone()))
}

fn open_raster(path: &Path) -> Result<RgbImage, DecodeError> {
    if !path.exists() {
        return Err(DecodeError::Missing(path.to_path_buf()));
    }
    let image = image::open(path).map_err(|source| DecodeError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}

/// Shrink to `max_dim` and record the background colour.
pub(crate) fn finish(image: RgbImage, max_dim: u32) -> DecodedImage {
    let background = border_mode(&image);
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    let image = if longest > max_dim {
        let scale = max_dim as f64 / longest as f64;
        let w = ((width as f64 * scale).round() as u32).max(1);
        let h = ((height as f64 * scale).round() as u32).max(1);
        image::imageops::resize(&image, w, h, FilterType::Triangle)
    } else {
        image
    };

    DecodedImage {
        width: image.width(),
        height: image.height(),
        rgb: image.into_raw(),
        background,
    }
}

/// Most frequent colour along the image border.
pub(crate) fn border_mode(image: &RgbImage) -> [u8; 3] {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return [255, 255, 255];
    }

    let mut counts: BTreeMap<[u8; 3], usize> = BTreeMap::new();
    let mut count = |x: u32, y: u32| {
        *counts.entry(image.get_pixel(x, y).0).or_default() += 1;
    };
    for x in 0..width {
        count(x, 0);
        count(x, height - 1);
    }
    for y in 1..height.saturating_sub(1) {
        count(0, y);
        count(width - 1, y);
    }

    counts
        .into_iter()
        .max_by_key(|&(_, n)| n)
        .map(|(color, _)| color)
        .unwrap_or([255, 255, 255])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "slide-selector-{}-{}-{name}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    /// 40×20 image: white frame, pink tissue in the middle.
    fn framed() -> RgbImage {
        RgbImage::from_fn(40, 20, |x, y| {
            if x < 2 || y < 2 || x >= 38 || y >= 18 {
                Rgb([250, 250, 250])
            } else {
                Rgb([200, 120, 160])
            }
        })
    }

    fn request(resolution: Resolution, paths: Vec<PathBuf>) -> DecodeRequest {
        DecodeRequest {
            resolution,
            paths,
            max_dim: 10,
            max_pixels: 1_000,
        }
    }

    #[test]
    fn thumbnail_is_downscaled_with_aspect_ratio() {
        let path = temp_path("thumb.png");
        framed().save(&path).expect("should write png");

        let image = FileDecoder
            .decode(&request(Resolution::Thumbnail, vec![path.clone()]))
            .expect("thumbnail should decode");
        assert_eq!((image.width, image.height), (10, 5));
        assert_eq!(image.rgb.len(), 10 * 5 * 3);
        assert_eq!(image.background, [250, 250, 250]);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_and_empty_inputs_are_errors() {
        let missing = temp_path("gone.png");
        let err = FileDecoder
            .decode(&request(Resolution::Thumbnail, vec![missing.clone()]))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Missing(p) if p == missing));

        let err = FileDecoder
            .decode(&request(Resolution::Slide, Vec::new()))
            .unwrap_err();
        assert!(matches!(err, DecodeError::NoFiles));
    }

    #[test]
    fn proprietary_slides_are_unsupported() {
        let path = temp_path("scan.svs");
        std::fs::write(&path, b"not a tiff").expect("should write file");

        let err = FileDecoder
            .decode(&request(Resolution::Slide, vec![path.clone()]))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported(_)));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn raster_slide_respects_pixel_budget() {
        let path = temp_path("slide.png");
        framed().save(&path).expect("should write png");

        let mut req = request(Resolution::Slide, vec![path.clone()]);
        req.max_pixels = 100;
        let err = FileDecoder.decode(&req).unwrap_err();
        assert!(matches!(err, DecodeError::NoLevelWithinBudget { budget: 100 }));

        req.max_pixels = 800;
        let image = FileDecoder.decode(&req).expect("level fits the budget");
        assert_eq!(image.width, 10);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn small_images_are_not_enlarged() {
        let image = finish(RgbImage::new(4, 3), 10);
        assert_eq!((image.width, image.height), (4, 3));
        assert_eq!(image.background, [0, 0, 0]);
    }
}
