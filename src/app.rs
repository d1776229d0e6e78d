use std::path::PathBuf;
use std::time::Duration;

use eframe::egui::{self, Key};

use crate::config::AppConfig;
use crate::state::{Action, AppState};
use crate::ui::{panels, selection, viewer};

// ---------------------------------------------------------------------------
// eframe App implementation
// ---------------------------------------------------------------------------

pub struct SelectionApp {
    pub state: AppState,
}

impl SelectionApp {
    pub fn new(config: AppConfig, dataset: Option<PathBuf>) -> Self {
        let mut state = AppState::new(config);
        if let Some(path) = dataset {
            state.dispatch(Action::Open(path));
        }
        Self { state }
    }
}

/// Keyboard shortcuts, ignored while a text field has focus.
fn shortcuts(ctx: &egui::Context, actions: &mut Vec<Action>) {
    if ctx.wants_keyboard_input() {
        return;
    }
    let bindings = [
        (Key::A, Action::Previous),
        (Key::D, Action::Next),
        (Key::S, Action::ToggleRanking),
        (Key::H, Action::ToggleOnlyHe),
        (Key::R, Action::ResetView),
    ];
    ctx.input(|i| {
        for (key, action) in bindings {
            if i.key_pressed(key) {
                actions.push(action);
            }
        }
    });
}

impl eframe::App for SelectionApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.state.poll_images() {
            ctx.request_repaint();
        }

        let mut actions = Vec::new();
        shortcuts(ctx, &mut actions);

        // ---- Top panel: menu bar and navigation ----
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            panels::top_bar(ui, &self.state, &mut actions);
        });

        // ---- Bottom panel: description and comment ----
        egui::TopBottomPanel::bottom("info_panel")
            .resizable(true)
            .default_height(140.0)
            .show(ctx, |ui| {
                panels::info_panel(ui, &self.state, &mut actions);
            });

        // ---- Left side panel: scan buttons ----
        let button_size = self.state.config.ui.button_size;
        egui::SidePanel::left("scan_panel")
            .default_width(button_size * 2.0 + 24.0)
            .resizable(true)
            .show(ctx, |ui| {
                selection::scan_panel(ui, &mut self.state, &mut actions);
            });

        // ---- Central panel: viewer ----
        egui::CentralPanel::default().show(ctx, |ui| {
            viewer::viewer(ui, &mut self.state, &mut actions);
        });

        for action in actions {
            self.state.dispatch(action);
        }
        self.state.request_images();
        if self.state.cache.has_pending() {
            ctx.request_repaint_after(Duration::from_millis(50));
        }

        if ctx.input(|i| i.viewport().close_requested()) {
            self.state.on_exit();
        }
    }
}
