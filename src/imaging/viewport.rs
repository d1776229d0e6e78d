use eframe::egui::{Pos2, Rect, Vec2};

use crate::config::ViewerConfig;

/// Scroll distance (points) that zooms by a factor of e.
const SCROLL_SCALE: f32 = 0.0015;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomLimits {
    pub min: f32,
    pub max: f32,
}

impl From<&ViewerConfig> for ZoomLimits {
    fn from(config: &ViewerConfig) -> Self {
        Self {
            min: config.min_zoom,
            max: config.max_zoom,
        }
    }
}

/// Pan and zoom relative to the image fitted into the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    /// Image centre minus canvas centre.
    pub offset: Vec2,
    /// 1.0 is fit-to-canvas.
    pub scale: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            offset: Vec2::ZERO,
            scale: 1.0,
        }
    }
}

impl ViewTransform {
    /// Where an image of `image_size` is drawn inside `canvas`.
    pub fn image_rect(&self, canvas: Rect, image_size: Vec2) -> Rect {
        let fit = if image_size.x > 0.0 && image_size.y > 0.0 {
            (canvas.width() / image_size.x).min(canvas.height() / image_size.y)
        } else {
            1.0
        };
        Rect::from_center_size(canvas.center() + self.offset, image_size * fit * self.scale)
    }

    pub fn pan(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    /// Multiply the scale by `factor`, keeping the image point under
    /// `pointer` where it is.
    pub fn zoom_at(&mut self, factor: f32, pointer: Pos2, canvas: Rect, limits: ZoomLimits) {
        let scale = (self.scale * factor).clamp(limits.min, limits.max);
        let ratio = scale / self.scale;
        let image_center = canvas.center() + self.offset;
        self.offset += (pointer - image_center) * (1.0 - ratio);
        self.scale = scale;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// Zoom factor for one frame of scrolling.
pub fn scroll_factor(scroll_y: f32, reverse: bool) -> f32 {
    let direction = if reverse { -1.0 } else { 1.0 };
    (scroll_y * SCROLL_SCALE * direction).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eframe::egui::{pos2, vec2};

    const LIMITS: ZoomLimits = ZoomLimits { min: 0.5, max: 32.0 };

    fn canvas() -> Rect {
        Rect::from_min_size(Pos2::ZERO, vec2(400.0, 200.0))
    }

    /// Image-relative coordinates (0..1) of a screen point.
    fn image_point(view: &ViewTransform, screen: Pos2) -> Vec2 {
        let rect = view.image_rect(canvas(), vec2(100.0, 100.0));
        (screen - rect.min) / rect.size()
    }

    #[test]
    fn identity_fits_the_image() {
        let rect = ViewTransform::default().image_rect(canvas(), vec2(100.0, 50.0));
        assert_eq!(rect, Rect::from_center_size(pos2(200.0, 100.0), vec2(400.0, 200.0)));
    }

    #[test]
    fn zoom_keeps_the_pointer_fixed() {
        let mut view = ViewTransform::default();
        view.pan(vec2(15.0, -10.0));
        let pointer = pos2(230.0, 60.0);
        let before = image_point(&view, pointer);

        view.zoom_at(2.5, pointer, canvas(), LIMITS);
        let after = image_point(&view, pointer);
        assert!((before - after).length() < 1e-4, "{before:?} vs {after:?}");
        assert_eq!(view.scale, 2.5);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut view = ViewTransform::default();
        view.zoom_at(1000.0, pos2(10.0, 10.0), canvas(), LIMITS);
        assert_eq!(view.scale, 32.0);
        view.zoom_at(1e-6, pos2(10.0, 10.0), canvas(), LIMITS);
        assert_eq!(view.scale, 0.5);
    }

    #[test]
    fn reset_restores_fit() {
        let mut view = ViewTransform::default();
        view.pan(vec2(5.0, 5.0));
        view.zoom_at(3.0, pos2(0.0, 0.0), canvas(), LIMITS);
        assert!(!view.is_identity());
        view.reset();
        assert!(view.is_identity());
    }

    #[test]
    fn scroll_direction_can_be_reversed() {
        assert!(scroll_factor(50.0, false) > 1.0);
        assert!(scroll_factor(50.0, true) < 1.0);
        assert_eq!(scroll_factor(0.0, true), 1.0);
    }
}
