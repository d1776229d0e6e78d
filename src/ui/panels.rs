use std::path::{Path, PathBuf};

use eframe::egui::{self, Color32, RichText, ScrollArea, Sense, TextEdit, Ui};

use crate::state::{Action, AppState};

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &AppState, actions: &mut Vec<Action>) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open…").clicked() {
                let source = state.session.as_ref().and_then(|s| s.dataset().source.as_deref());
                if let Some(path) = open_file_dialog(source) {
                    actions.push(Action::Open(path));
                }
                ui.close_menu();
            }
            let has_session = state.session.is_some();
            if ui.add_enabled(has_session, egui::Button::new("Save")).clicked() {
                actions.push(Action::Save);
                ui.close_menu();
            }
            if ui
                .add_enabled(has_session, egui::Button::new("Save As…"))
                .clicked()
            {
                if let Some(path) = save_file_dialog(state.output_path.as_ref()) {
                    actions.push(Action::SaveAs(path));
                }
                ui.close_menu();
            }
        });

        ui.separator();

        let Some(session) = &state.session else {
            ui.label("No dataset loaded.");
            status_line(ui, state);
            return;
        };
        let record = session.current();

        let title = format!(
            "{}  ({}/{})",
            record.case_label(),
            session.position() + 1,
            session.len()
        );
        let hover = match &session.dataset().source {
            Some(path) => format!("{}\nRight click to copy the PA number", path.display()),
            None => "Right click to copy the PA number".to_string(),
        };
        let label = ui
            .add(egui::Label::new(RichText::new(title).strong()).sense(Sense::click()))
            .on_hover_text(hover);
        if label.secondary_clicked() {
            if let Some(pa) = &record.pa_number {
                ui.ctx().copy_text(pa.clone());
            }
        }

        ui.separator();

        if ui
            .add_enabled(!session.is_first(), egui::Button::new("◀ Previous"))
            .on_hover_text("A")
            .clicked()
        {
            actions.push(Action::Previous);
        }
        if ui
            .add_enabled(!session.is_last(), egui::Button::new("Next ▶"))
            .on_hover_text("D")
            .clicked()
        {
            actions.push(Action::Next);
        }

        ui.separator();

        if ui
            .selectable_label(state.only_he, "Only H&E")
            .on_hover_text("H")
            .clicked()
        {
            actions.push(Action::ToggleOnlyHe);
        }
        if ui
            .selectable_label(session.ranking(), "Add score")
            .on_hover_text("S")
            .clicked()
        {
            actions.push(Action::ToggleRanking);
        }

        status_line(ui, state);
    });
}

fn status_line(ui: &mut Ui, state: &AppState) {
    if let Some(msg) = &state.status_message {
        ui.separator();
        let text = RichText::new(msg);
        ui.label(if msg.starts_with("Error") {
            text.color(Color32::RED)
        } else {
            text
        });
    }
}

// ---------------------------------------------------------------------------
// Info panel – description and comment
// ---------------------------------------------------------------------------

pub fn info_panel(ui: &mut Ui, state: &AppState, actions: &mut Vec<Action>) {
    let Some(session) = &state.session else {
        return;
    };
    let record = session.current();

    ui.horizontal(|ui: &mut Ui| {
        ui.strong("Description");
        let limit = match session.max_selected() {
            usize::MAX => String::from("∞"),
            n => n.to_string(),
        };
        ui.weak(format!("{} of {limit} selected", record.selection.len()));
    });
    ScrollArea::vertical()
        .id_salt("description")
        .max_height(ui.available_height() * 0.6)
        .show(ui, |ui: &mut Ui| {
            ui.label(&record.description);
        });

    ui.separator();
    ui.strong("Comment");
    let mut comment = record.comment.clone();
    let edit = ui.add(
        TextEdit::multiline(&mut comment)
            .desired_rows(2)
            .desired_width(f32::INFINITY)
            .hint_text("Notes on this specimen"),
    );
    if edit.changed() {
        actions.push(Action::SetComment(comment));
    }
}

// ---------------------------------------------------------------------------
// File dialogs
// ---------------------------------------------------------------------------

/// Starts next to the table that is currently open.
pub fn open_file_dialog(current: Option<&Path>) -> Option<PathBuf> {
    let mut dialog = rfd::FileDialog::new()
        .set_title("Open specimen table")
        .add_filter("Supported files", &["json", "csv", "parquet", "pq"])
        .add_filter("JSON", &["json"])
        .add_filter("CSV", &["csv"])
        .add_filter("Parquet", &["parquet", "pq"]);
    if let Some(dir) = current.and_then(Path::parent) {
        dialog = dialog.set_directory(dir);
    }
    dialog.pick_file()
}

pub fn save_file_dialog(current: Option<&PathBuf>) -> Option<PathBuf> {
    let mut dialog = rfd::FileDialog::new()
        .set_title("Save selection")
        .add_filter("JSON", &["json"])
        .add_filter("CSV", &["csv"])
        .add_filter("Parquet", &["parquet", "pq"]);
    if let Some(path) = current {
        if let Some(dir) = path.parent() {
            dialog = dialog.set_directory(dir);
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            dialog = dialog.set_file_name(name);
        }
    }
    dialog.save_file()
}
