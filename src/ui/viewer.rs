use eframe::egui::{pos2, vec2, Align2, Color32, FontId, Rect, Sense, Ui};

use crate::imaging::cache::{ImageCache, Slot};
use crate::imaging::loader::ImageKey;
use crate::imaging::viewport::{scroll_factor, ZoomLimits};
use crate::imaging::Resolution;
use crate::state::{Action, AppState};

/// What the canvas shows for the current scan.
#[derive(Debug, Clone, PartialEq)]
enum ViewerState {
    /// Draw the image under `key`; `note` reports a failed slide level
    /// while the thumbnail stands in.
    Image { key: ImageKey, note: Option<String> },
    Loading,
    Unavailable(String),
}

/// Choose between the slide level and the thumbnail.
///
/// `slide` is `None` when slide levels are not loaded, `thumbnail` is `None`
/// when the scan has no thumbnail file.
fn display_state(
    cache: &ImageCache,
    slide: Option<ImageKey>,
    thumbnail: Option<ImageKey>,
) -> ViewerState {
    if let Some(key) = slide.filter(|k| matches!(cache.get(k), Some(Slot::Ready(_)))) {
        return ViewerState::Image { key, note: None };
    }
    let slide_failure = match slide.and_then(|k| cache.get(&k)) {
        Some(Slot::Failed(error)) => Some(format!("Slide image unavailable: {error}")),
        _ => None,
    };

    match (thumbnail, thumbnail.and_then(|k| cache.get(&k))) {
        (Some(key), Some(Slot::Ready(_))) => ViewerState::Image {
            key,
            note: slide_failure,
        },
        // The slide level is still on its way.
        _ if slide.is_some() && slide_failure.is_none() => ViewerState::Loading,
        (None, _) => {
            ViewerState::Unavailable(slide_failure.unwrap_or_else(|| "No thumbnail".into()))
        }
        (Some(_), Some(Slot::Failed(error))) => ViewerState::Unavailable(
            slide_failure.unwrap_or_else(|| format!("Thumbnail unavailable: {error}")),
        ),
        (Some(_), _) => slide_failure.map_or(ViewerState::Loading, ViewerState::Unavailable),
    }
}

/// Pan/zoom canvas for the shown scan.
///
/// Drag pans, scrolling zooms around the pointer, right click or double
/// click resets. While the slide level loads, the thumbnail stands in.
pub fn viewer(ui: &mut Ui, state: &mut AppState, actions: &mut Vec<Action>) {
    let (canvas, response) = ui.allocate_exact_size(ui.available_size(), Sense::click_and_drag());
    let painter = ui.painter_at(canvas);
    let weak = ui.visuals().weak_text_color();
    let message = |text: &str| {
        painter.text(
            canvas.center(),
            Align2::CENTER_CENTER,
            text,
            FontId::proportional(18.0),
            weak,
        );
    };

    let Some(session) = &state.session else {
        message("Open a dataset with File → Open…");
        return;
    };
    let Some(scan) = state.shown_scan else {
        message("No scans");
        return;
    };
    let specimen = session.current_index();
    let key = |resolution| ImageKey {
        specimen,
        scan,
        resolution,
    };
    let has_thumbnail = session
        .current()
        .scans
        .get(scan)
        .is_some_and(|group| group.thumbnail_path().is_some());

    // -- Interaction --
    if response.dragged() {
        state.view.pan(response.drag_delta());
    }
    if let Some(pointer) = response.hover_pos() {
        let scroll = ui.input(|i| i.smooth_scroll_delta.y);
        if scroll != 0.0 {
            let factor = scroll_factor(scroll, state.config.viewer.reverse_zoom);
            let limits = ZoomLimits::from(&state.config.viewer);
            state.view.zoom_at(factor, pointer, canvas, limits);
        }
    }
    if response.double_clicked() || response.secondary_clicked() {
        actions.push(Action::ResetView);
    }

    // -- Drawing --
    let slide = state.config.loader.load_slide_images.then(|| key(Resolution::Slide));
    let thumbnail = has_thumbnail.then(|| key(Resolution::Thumbnail));
    let (image_key, note) = match display_state(&state.cache, slide, thumbnail) {
        ViewerState::Image { key, note } => (key, note),
        ViewerState::Loading => {
            message("Loading…");
            return;
        }
        ViewerState::Unavailable(text) => {
            message(&text);
            return;
        }
    };

    if let Some((image, texture)) = state.cache.texture(ui.ctx(), &image_key) {
        let [r, g, b] = image.background;
        painter.rect_filled(canvas, 0.0, Color32::from_rgb(r, g, b));
        let size = vec2(image.width as f32, image.height as f32);
        let target = state.view.image_rect(canvas, size);
        let uv = Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0));
        painter.image(texture.id(), target, uv, Color32::WHITE);
    }

    if let Some(note) = note {
        painter.text(
            canvas.left_bottom() + vec2(8.0, -8.0),
            Align2::LEFT_BOTTOM,
            note,
            FontId::proportional(13.0),
            Color32::from_rgb(220, 80, 80),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::loader::LoadEvent;
    use crate::imaging::DecodedImage;
    use std::sync::Arc;

    fn key(resolution: Resolution) -> ImageKey {
        ImageKey {
            specimen: 0,
            scan: 0,
            resolution,
        }
    }

    fn loaded(cache: &mut ImageCache, key: ImageKey) {
        cache.mark_pending(key, 0);
        cache.apply(LoadEvent::Loaded {
            key,
            generation: 0,
            image: Arc::new(DecodedImage {
                width: 1,
                height: 1,
                rgb: vec![0; 3],
                background: [0, 0, 0],
            }),
        });
    }

    fn failed(cache: &mut ImageCache, key: ImageKey, error: &str) {
        cache.mark_pending(key, 0);
        cache.apply(LoadEvent::Failed {
            key,
            generation: 0,
            error: error.into(),
        });
    }

    #[test]
    fn slide_level_wins_over_thumbnail() {
        let mut cache = ImageCache::default();
        let (slide, thumb) = (key(Resolution::Slide), key(Resolution::Thumbnail));
        loaded(&mut cache, thumb);
        assert_eq!(
            display_state(&cache, Some(slide), Some(thumb)),
            ViewerState::Image {
                key: thumb,
                note: None
            }
        );

        loaded(&mut cache, slide);
        assert_eq!(
            display_state(&cache, Some(slide), Some(thumb)),
            ViewerState::Image {
                key: slide,
                note: None
            }
        );
    }

    #[test]
    fn failed_slide_falls_back_to_thumbnail_with_a_note() {
        let mut cache = ImageCache::default();
        let (slide, thumb) = (key(Resolution::Slide), key(Resolution::Thumbnail));
        failed(&mut cache, slide, "unsupported slide format");
        assert_eq!(
            display_state(&cache, Some(slide), Some(thumb)),
            ViewerState::Unavailable("Slide image unavailable: unsupported slide format".into())
        );

        loaded(&mut cache, thumb);
        let ViewerState::Image { key, note } = display_state(&cache, Some(slide), Some(thumb))
        else {
            panic!("thumbnail should be shown");
        };
        assert_eq!(key, thumb);
        assert!(note.is_some_and(|n| n.contains("unsupported")));
    }

    #[test]
    fn failed_thumbnail_is_reported_without_slide_levels() {
        let mut cache = ImageCache::default();
        let thumb = key(Resolution::Thumbnail);
        assert_eq!(display_state(&cache, None, Some(thumb)), ViewerState::Loading);

        failed(&mut cache, thumb, "file not found");
        assert_eq!(
            display_state(&cache, None, Some(thumb)),
            ViewerState::Unavailable("Thumbnail unavailable: file not found".into())
        );
    }

    #[test]
    fn missing_thumbnail_is_reported() {
        let cache = ImageCache::default();
        assert_eq!(
            display_state(&cache, None, None),
            ViewerState::Unavailable("No thumbnail".into())
        );
        // A slide level on its way still shows progress.
        assert_eq!(
            display_state(&cache, Some(key(Resolution::Slide)), None),
            ViewerState::Loading
        );
    }
}
