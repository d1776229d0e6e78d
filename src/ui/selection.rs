use eframe::egui::{
    pos2, vec2, Align2, Color32, FontId, Rect, Response, ScrollArea, Sense, Shape, Stroke,
    TextureHandle, Ui,
};

use crate::imaging::cache::Slot;
use crate::imaging::loader::ImageKey;
use crate::imaging::viewport::ViewTransform;
use crate::imaging::{ImageMeta, Resolution};
use crate::state::{Action, AppState};

const SELECTED_BORDER: Color32 = Color32::from_rgb(100, 180, 100);
const LABEL_HEIGHT: f32 = 20.0;

/// What one button shows, gathered before any texture is touched.
struct ScanButton {
    scan: usize,
    staining: String,
    color: Color32,
    selected: bool,
    shown: bool,
    selectable: bool,
    score: Option<u32>,
    /// IHC scans sharing this block (shown when IHC is hidden).
    ihc: Option<usize>,
    has_thumbnail: bool,
    file_name: String,
}

// ---------------------------------------------------------------------------
// Scan panel
// ---------------------------------------------------------------------------

/// One button per listed scan of the current specimen.
pub fn scan_panel(ui: &mut Ui, state: &mut AppState, actions: &mut Vec<Action>) {
    let Some(session) = &state.session else {
        ui.label("No dataset loaded.");
        return;
    };
    let specimen = session.current_index();
    let record = session.current();

    let buttons: Vec<ScanButton> = state
        .visible_scans()
        .into_iter()
        .filter_map(|scan| {
            let group = record.scans.get(scan)?;
            let slide = record.slide_of(scan)?;
            Some(ScanButton {
                scan,
                staining: slide.staining.clone(),
                color: state.colors.color_for(&slide.staining),
                selected: record.is_selected(scan),
                shown: state.shown_scan == Some(scan),
                selectable: session.selectable(scan),
                score: record.score_of(scan),
                ihc: state.only_he.then(|| record.ihc_count(scan)),
                has_thumbnail: group.thumbnail_path().is_some(),
                file_name: group
                    .slide_paths()
                    .first()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| group.base_dir.display().to_string()),
            })
        })
        .collect();

    ui.heading("Scans");
    ui.separator();

    if buttons.is_empty() {
        ui.label(if record.scans.is_empty() {
            "No scans"
        } else {
            "No H&E scans"
        });
        return;
    }

    let size = state.config.ui.button_size;
    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            ui.horizontal_wrapped(|ui: &mut Ui| {
                for button in &buttons {
                    let key = ImageKey {
                        specimen,
                        scan: button.scan,
                        resolution: Resolution::Thumbnail,
                    };
                    let thumbnail = state.cache.texture(ui.ctx(), &key);
                    let placeholder = match state.cache.get(&key) {
                        _ if !button.has_thumbnail => "No Thumbnail",
                        Some(Slot::Failed(_)) => "Unreadable",
                        _ => "Loading…",
                    };
                    let response = scan_button(ui, button, thumbnail, placeholder, size);
                    if response.clicked() {
                        actions.push(Action::ToggleScan(button.scan));
                    }
                    if response.secondary_clicked() {
                        actions.push(Action::ShowScan(button.scan));
                    }
                }
            });
        });
}

fn scan_button(
    ui: &mut Ui,
    button: &ScanButton,
    thumbnail: Option<(ImageMeta, TextureHandle)>,
    placeholder: &str,
    size: f32,
) -> Response {
    let (rect, response) = ui.allocate_exact_size(vec2(size, size), Sense::click());
    let painter = ui.painter_at(rect);
    let visuals = ui.visuals();

    let background = thumbnail
        .as_ref()
        .map(|(image, _)| {
            let [r, g, b] = image.background;
            Color32::from_rgb(r, g, b)
        })
        .unwrap_or(visuals.extreme_bg_color);
    painter.rect_filled(rect, 4.0, background);

    let image_area = Rect::from_min_max(rect.min, pos2(rect.max.x, rect.max.y - LABEL_HEIGHT))
        .shrink(6.0);
    match &thumbnail {
        Some((image, texture)) => {
            let size = vec2(image.width as f32, image.height as f32);
            let target = ViewTransform::default().image_rect(image_area, size);
            let uv = Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0));
            painter.image(texture.id(), target, uv, Color32::WHITE);
        }
        None => {
            painter.text(
                image_area.center(),
                Align2::CENTER_CENTER,
                placeholder,
                FontId::proportional(13.0),
                visuals.weak_text_color(),
            );
        }
    }

    let label = match button.ihc {
        Some(n) if n > 0 => format!("{}  +{n} IHC", button.staining),
        _ => button.staining.clone(),
    };
    painter.text(
        pos2(rect.center().x, rect.max.y - LABEL_HEIGHT / 2.0),
        Align2::CENTER_CENTER,
        label,
        FontId::proportional(13.0),
        button.color,
    );
    if let Some(score) = button.score {
        painter.text(
            rect.min + vec2(8.0, 6.0),
            Align2::LEFT_TOP,
            format!("#{score}"),
            FontId::proportional(15.0),
            visuals.strong_text_color(),
        );
    }

    let border = if button.selected {
        Some(Stroke::new(5.0, SELECTED_BORDER))
    } else if button.shown {
        Some(Stroke::new(2.0, visuals.selection.stroke.color))
    } else if response.hovered() {
        Some(visuals.widgets.hovered.fg_stroke)
    } else {
        None
    };
    if let Some(stroke) = border {
        let r = rect.shrink(stroke.width / 2.0);
        let corners = vec![r.left_top(), r.right_top(), r.right_bottom(), r.left_bottom()];
        painter.add(Shape::closed_line(corners, stroke));
    }
    if !button.selectable {
        painter.rect_filled(rect, 4.0, Color32::from_black_alpha(120));
    }

    let hover = if button.selectable {
        format!("{}\nClick to (de)select, right click to view", button.file_name)
    } else {
        format!("{}\nIHC scans cannot be selected", button.file_name)
    };
    response.on_hover_text(hover)
}
