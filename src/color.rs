use std::collections::{BTreeMap, BTreeSet};

use eframe::egui::Color32;
use palette::{Hsl, IntoColor, Srgb};

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Color32> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.65, 0.45);
            let rgb: Srgb = hsl.into_color();
            Color32::from_rgb(
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Staining → Color32
// ---------------------------------------------------------------------------

/// Distinct label colours for every staining in a dataset.
#[derive(Debug, Clone, Default)]
pub struct StainColors {
    mapping: BTreeMap<String, Color32>,
}

impl StainColors {
    pub fn new(stainings: &BTreeSet<String>) -> Self {
        let mapping = stainings
            .iter()
            .cloned()
            .zip(generate_palette(stainings.len()))
            .collect();
        StainColors { mapping }
    }

    pub fn color_for(&self, staining: &str) -> Color32 {
        self.mapping.get(staining).copied().unwrap_or(Color32::GRAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_colours_are_distinct() {
        let colors = generate_palette(5);
        assert_eq!(colors.len(), 5);
        let unique: BTreeSet<[u8; 4]> = colors.iter().map(|c| c.to_array()).collect();
        assert_eq!(unique.len(), 5);
        assert!(generate_palette(0).is_empty());
    }

    #[test]
    fn unknown_staining_is_gray() {
        let stainings: BTreeSet<String> = ["CD20", "H&E"].iter().map(|s| s.to_string()).collect();
        let colors = StainColors::new(&stainings);
        assert_ne!(colors.color_for("CD20"), colors.color_for("H&E"));
        assert_eq!(colors.color_for("Ki-67"), Color32::GRAY);
    }
}
