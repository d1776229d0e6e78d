//! Writes a small synthetic dataset: `dataset.json`, `dataset.parquet` and
//! the PNG images they point to.
//!
//! Usage: `generate_sample [DIR]` (default `sample_data`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use image::{Rgb, RgbImage};
use parquet::arrow::ArrowWriter;
use serde_json::{json, Value as JsonValue};

const BACKGROUND: [u8; 3] = [242, 240, 243];

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

/// Tissue-like blobs on a light background.
fn tissue_image(width: u32, height: u32, stain: [u8; 3], rng: &mut SimpleRng) -> RgbImage {
    let blobs: Vec<(f64, f64, f64, f64)> = (0..4)
        .map(|_| {
            (
                rng.range(0.25, 0.75) * width as f64,
                rng.range(0.25, 0.75) * height as f64,
                rng.range(0.10, 0.22) * width as f64,
                rng.range(0.10, 0.22) * height as f64,
            )
        })
        .collect();

    let mut image = RgbImage::from_pixel(width, height, Rgb(BACKGROUND));
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let inside = blobs.iter().any(|&(cx, cy, rx, ry)| {
            let dx = (x as f64 - cx) / rx;
            let dy = (y as f64 - cy) / ry;
            dx * dx + dy * dy <= 1.0
        });
        if inside {
            let shade = rng.range(0.8, 1.0);
            *pixel = Rgb(stain.map(|c| (c as f64 * shade) as u8));
        }
    }
    image
}

struct ScanSpec {
    name: &'static str,
    with_thumbnail: bool,
}

struct SlideSpec {
    specimen_nr: &'static str,
    block: &'static str,
    staining: &'static str,
    scans: Vec<ScanSpec>,
}

fn scan(name: &'static str) -> ScanSpec {
    ScanSpec {
        name,
        with_thumbnail: true,
    }
}

fn stain_color(staining: &str) -> [u8; 3] {
    let lower = staining.to_lowercase();
    if lower.contains("he") || lower.contains("h&e") {
        [196, 110, 170]
    } else {
        [150, 100, 60]
    }
}

/// Write the images of one specimen and return its `slides` cell.
fn write_specimen(
    dir: &Path,
    pa_number: &str,
    slides: &[SlideSpec],
    rng: &mut SimpleRng,
) -> Result<JsonValue> {
    let base_dir = dir.join(pa_number);
    std::fs::create_dir_all(&base_dir)
        .with_context(|| format!("creating {}", base_dir.display()))?;

    let mut cells = Vec::new();
    for slide in slides {
        let mut scans = Vec::new();
        for scan in &slide.scans {
            let color = stain_color(slide.staining);
            let slide_file = format!("{}.png", scan.name);
            tissue_image(1600, 1200, color, rng)
                .save(base_dir.join(&slide_file))
                .with_context(|| format!("writing {slide_file}"))?;

            let mut files = json!({ "SLIDE": [slide_file] });
            if scan.with_thumbnail {
                let thumb_file = format!("{}_thumb.png", scan.name);
                tissue_image(400, 300, color, rng)
                    .save(base_dir.join(&thumb_file))
                    .with_context(|| format!("writing {thumb_file}"))?;
                files["THUMBNAIL"] = json!([thumb_file]);
            }
            scans.push(json!({ "base_dir": base_dir.to_string_lossy(), "files": files }));
        }
        cells.push(json!({
            "pa_number": pa_number,
            "specimen_nr": slide.specimen_nr,
            "block": slide.block,
            "staining": slide.staining,
            "scan": scans,
        }));
    }
    Ok(json!({ "slides": cells }))
}

fn main() -> Result<()> {
    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_data"));
    // Scans store absolute directories so the tables open from anywhere.
    let dir = std::env::current_dir().context("resolving working directory")?.join(dir);
    let mut rng = SimpleRng::new(42);

    let specimens: Vec<(&str, &str, i64, Vec<SlideSpec>)> = vec![
        (
            "Colon resection, adenocarcinoma, margins free.",
            "T23-01234",
            1001,
            vec![
                SlideSpec {
                    specimen_nr: "1",
                    block: "1",
                    staining: "HE",
                    scans: vec![scan("T23-01234_1_1_HE_a"), scan("T23-01234_1_1_HE_b")],
                },
                SlideSpec {
                    specimen_nr: "1",
                    block: "1",
                    staining: "CD20",
                    scans: vec![scan("T23-01234_1_1_CD20")],
                },
                SlideSpec {
                    specimen_nr: "1",
                    block: "2",
                    staining: "HE",
                    scans: vec![scan("T23-01234_1_2_HE")],
                },
            ],
        ),
        (
            "Skin excision, basal cell carcinoma.",
            "T23-05678",
            1002,
            vec![SlideSpec {
                specimen_nr: "2",
                block: "1",
                staining: "H&E",
                scans: vec![ScanSpec {
                    name: "T23-05678_2_1_HE",
                    with_thumbnail: false,
                }],
            }],
        ),
    ];

    let mut records = Vec::new();
    for (description, pa_number, patient_id, slides) in &specimens {
        let cell = write_specimen(&dir, pa_number, slides, &mut rng)?;
        records.push(json!({
            "description": description,
            "slides": cell,
            "patient_id": patient_id,
        }));
    }

    // JSON (records layout)
    let json_path = dir.join("dataset.json");
    let text = serde_json::to_string_pretty(&records).context("serialising records")?;
    std::fs::write(&json_path, text).with_context(|| format!("writing {}", json_path.display()))?;

    // Parquet (nested column stored as JSON text)
    let schema = Arc::new(Schema::new(vec![
        Field::new("description", DataType::Utf8, false),
        Field::new("slides", DataType::Utf8, false),
        Field::new("patient_id", DataType::Int64, false),
    ]));
    let descriptions: Vec<&str> = specimens.iter().map(|s| s.0).collect();
    let slides: Vec<String> = records.iter().map(|r| r["slides"].to_string()).collect();
    let ids: Vec<i64> = specimens.iter().map(|s| s.2).collect();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(descriptions)),
            Arc::new(StringArray::from(slides)),
            Arc::new(Int64Array::from(ids)),
        ],
    )
    .context("building record batch")?;

    let parquet_path = dir.join("dataset.parquet");
    let file = std::fs::File::create(&parquet_path)
        .with_context(|| format!("creating {}", parquet_path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;

    println!(
        "Wrote {} specimens to {} and {}",
        records.len(),
        json_path.display(),
        parquet_path.display()
    );
    Ok(())
}
