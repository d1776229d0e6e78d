mod app;
mod color;
mod config;
mod data;
mod imaging;
mod session;
mod state;
mod ui;

use anyhow::{anyhow, Context, Result};
use app::SelectionApp;
use config::{AppConfig, LaunchArgs};
use eframe::egui;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = LaunchArgs::parse(&args).context("invalid arguments")?;
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(output) = args.output {
        config.output_path = Some(output);
    }
    log::debug!("{config:?}");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 900.0])
            .with_min_inner_size([700.0, 450.0]),
        ..Default::default()
    };

    let dataset = args.dataset;
    eframe::run_native(
        "Slide Selector",
        options,
        Box::new(move |_cc| Ok(Box::new(SelectionApp::new(config, dataset)))),
    )
    .map_err(|e| anyhow!("{e}"))
}
