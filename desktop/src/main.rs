mod viewer;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use fishcount_core::{
    app::{App, Settings},
    detection::{Detect, YoloConfig},
};

use crate::viewer::Viewer;

#[derive(Parser)]
#[command(name = "fish-counter-desktop", version, about = "Fish counter viewer")]
struct Cli {
    /// Video or image to open on startup
    input: Option<PathBuf>,

    /// YOLOv8 ONNX model path
    #[arg(long, default_value = "models/fish.onnx")]
    model: PathBuf,

    /// Number of classes the model was trained on
    #[arg(long, default_value_t = 1)]
    classes: usize,

    /// Only count this class index
    #[arg(long)]
    target_class: Option<usize>,

    /// Delay between video frames in milliseconds
    #[arg(long, default_value_t = 30)]
    interval_ms: u64,

    /// Frames kept on the chart (0 keeps all)
    #[arg(long, default_value_t = 500)]
    chart_window: usize,

    /// Lines kept in each log panel
    #[arg(long, default_value_t = 1000)]
    log_lines: usize,
}

impl Cli {
    fn config(&self) -> YoloConfig {
        YoloConfig {
            num_classes: self.classes,
            target_class: self.target_class,
            ..YoloConfig::default()
        }
    }

    fn settings(&self) -> Settings {
        Settings {
            tick_interval: Duration::from_millis(self.interval_ms),
            chart_window: (self.chart_window > 0).then_some(self.chart_window),
            log_lines: self.log_lines,
        }
    }
}

#[cfg(feature = "onnx")]
fn load_detector(cli: &Cli) -> Result<Box<dyn Detect>> {
    let detector = fishcount_core::detection::YoloDetector::load(&cli.model, cli.config())
        .with_context(|| format!("failed to load model: {}", cli.model.display()))?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "onnx"))]
fn load_detector(cli: &Cli) -> Result<Box<dyn Detect>> {
    anyhow::bail!(
        "cannot load {} ({:?}): fish-counter-desktop was built without the `onnx` feature",
        cli.model.display(),
        cli.config()
    )
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let detector = load_detector(&cli)?;
    let app = App::new(detector, cli.settings());
    let initial = cli.input.clone();

    let options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_title("Fish Counter")
            .with_inner_size([1280.0, 760.0]),
        ..Default::default()
    };

    eframe::run_native(
        "fish-counter",
        options,
        Box::new(move |cc| Ok(Box::new(Viewer::new(cc, app, initial)))),
    )
    .map_err(|e| anyhow::anyhow!("error while running fish-counter: {e}"))
    .context("desktop viewer exited abnormally")
}
