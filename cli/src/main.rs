use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fishcount_core::{
    app::{App, PlaybackState, Settings, TextLog, TickOutcome},
    detection::{Detect, YoloConfig},
    media::MediaKind,
    video,
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "fish-counter",
    version,
    about = "Count fish in videos and images with a YOLOv8 model",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect and count fish in a video or image, frame by frame.
    Run {
        /// Input video (.mp4, .avi) or image (.jpg, .png)
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        /// Delay between frames in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,

        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,

        /// Frames kept on the chart (0 keeps all)
        #[arg(long, default_value_t = 500)]
        chart_window: usize,

        /// Lines kept in each text log
        #[arg(long, default_value_t = fishcount_core::app::DEFAULT_LOG_LINES)]
        log_lines: usize,

        /// Directory for the last annotated frame, the chart and both logs
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Write a JSON session summary here
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Print the media kind and estimated frame count of a file.
    Probe {
        /// Input video or image
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Args)]
struct ModelArgs {
    /// YOLOv8 ONNX model path
    #[arg(long, default_value = "models/fish.onnx")]
    model: PathBuf,

    /// Number of classes the model was trained on
    #[arg(long, default_value_t = 1)]
    classes: usize,

    /// Only count this class index
    #[arg(long)]
    target_class: Option<usize>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            model,
            interval_ms,
            max_frames,
            chart_window,
            log_lines,
            out_dir,
            summary,
        } => {
            let settings = Settings {
                tick_interval: Duration::from_millis(interval_ms),
                chart_window: (chart_window > 0).then_some(chart_window),
                log_lines,
            };
            let detector = load_detector(&model)?;
            cmd_run(
                App::new(detector, settings),
                &input,
                max_frames,
                out_dir.as_deref(),
                summary.as_deref(),
            )
        }
        Commands::Probe { input } => cmd_probe(&input),
    }
}

impl ModelArgs {
    fn config(&self) -> YoloConfig {
        YoloConfig {
            num_classes: self.classes,
            target_class: self.target_class,
            ..YoloConfig::default()
        }
    }
}

#[cfg(feature = "onnx")]
fn load_detector(args: &ModelArgs) -> Result<Box<dyn Detect>> {
    let detector = fishcount_core::detection::YoloDetector::load(&args.model, args.config())
        .with_context(|| format!("failed to load model: {}", args.model.display()))?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "onnx"))]
fn load_detector(args: &ModelArgs) -> Result<Box<dyn Detect>> {
    anyhow::bail!(
        "cannot load {} ({:?}): fish-counter was built without the `onnx` feature",
        args.model.display(),
        args.config()
    )
}

// ── run ───────────────────────────────────────────────────────────────────────

fn cmd_run(
    mut app: App<Box<dyn Detect>>,
    input: &Path,
    max_frames: Option<u64>,
    out_dir: Option<&Path>,
    summary: Option<&Path>,
) -> Result<()> {
    info!("input : {}", input.display());

    app.select_file(input)
        .with_context(|| format!("failed to load {}", input.display()))?;

    if app.start() {
        let pb = progress_bar(input);
        loop {
            let now = Instant::now();
            if let Some(wait) = app
                .next_deadline()
                .map(|due| due.saturating_duration_since(now))
            {
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
            }
            match app.tick(Instant::now())? {
                TickOutcome::Frame(report) => {
                    pb.inc(1);
                    pb.set_message(app.view().count_label.clone());
                    for (x, y) in report.centers() {
                        tracing::debug!(frame = report.index, x, y, "fish");
                    }
                    if max_frames.is_some_and(|max| report.index >= max) {
                        app.stop();
                        break;
                    }
                }
                TickOutcome::EndOfStream => break,
                TickOutcome::Idle => {
                    if app.state() != PlaybackState::Playing {
                        break;
                    }
                }
            }
        }
        pb.finish_with_message(app.view().count_label.clone());
    }

    let agg = app.aggregator();
    info!(
        frames = agg.frames(),
        total = agg.total_detections(),
        peak = agg.peak(),
        mean = format!("{:.2}", agg.mean()),
        "{}",
        app.view().count_label
    );

    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        if let Some(frame) = app.view().frame.as_ref() {
            video::save_frame(frame, dir.join("last_frame.png"))?;
        }
        video::save_frame(&app.view().chart, dir.join("chart.png"))?;
        write_log(&dir.join("parameters.log"), &app.view().param_log)?;
        write_log(&dir.join("coordinates.log"), &app.view().coord_log)?;
        info!("wrote frame, chart and logs to {}", dir.display());
    }

    if let Some(path) = summary {
        let summary = app.summary().context("no media session to summarise")?;
        let json = serde_json::to_string_pretty(&summary).context("serialising summary")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("wrote summary to {}", path.display());
    }

    app.close();
    Ok(())
}

// ── probe ─────────────────────────────────────────────────────────────────────

fn cmd_probe(input: &Path) -> Result<()> {
    let kind = MediaKind::from_path(input)?;
    match kind {
        MediaKind::Image => {
            let frame = video::load_still(input)?;
            println!("{kind}: {}x{}", frame.width, frame.height);
        }
        MediaKind::Video => println!("{kind}: ~{} frames", estimated_frames(input)),
    }
    Ok(())
}

#[cfg(feature = "ffmpeg")]
fn estimated_frames(input: &Path) -> u64 {
    video::total_frames(input)
}

#[cfg(not(feature = "ffmpeg"))]
fn estimated_frames(_input: &Path) -> u64 {
    0
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn write_log(path: &Path, log: &TextLog) -> Result<()> {
    let mut text = log.lines().collect::<Vec<_>>().join("\n");
    text.push('\n');
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

fn progress_bar(input: &Path) -> ProgressBar {
    let total = estimated_frames(input);
    let pb = if total > 0 {
        ProgressBar::new(total)
    } else {
        ProgressBar::new_spinner()
    };
    let template = if total > 0 {
        "{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}"
    } else {
        "{spinner:.cyan} [{elapsed_precise}] {pos} frames {msg}"
    };
    if let Ok(style) = ProgressStyle::with_template(template) {
        pb.set_style(
            style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
    }
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_run(args: &[&str]) -> (usize, usize) {
        let base = ["fish-counter", "run", "-i", "clip.mp4"];
        let cli = Cli::try_parse_from(base.iter().chain(args).copied())
            .unwrap();
        match cli.command {
            Commands::Run {
                chart_window,
                log_lines,
                ..
            } => (chart_window, log_lines),
            Commands::Probe { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn run_bounds_logs_by_default_and_on_request() {
        assert_eq!(parse_run(&[]), (500, fishcount_core::app::DEFAULT_LOG_LINES));
        assert_eq!(parse_run(&["--log-lines", "20", "--chart-window", "0"]), (0, 20));
    }

    #[test]
    fn written_logs_end_with_a_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinates.log");
        let mut log = TextLog::new(2);
        for line in ["x: 1, y: 1", "x: 2, y: 2", "x: 3, y: 3"] {
            log.push(line);
        }
        write_log(&path, &log).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "x: 2, y: 2\nx: 3, y: 3\n"
        );
    }
}
