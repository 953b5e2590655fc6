//! app — the playback controller behind every front end
//!
//! `App` owns the media session, the ticker, the pipeline and the aggregator,
//! and keeps a `View` with everything a front end displays.  Front ends only
//! forward user commands and call `tick` from their event loop.

use anyhow::Result;
use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::aggregate::{Aggregator, SessionSummary, CHART_HEIGHT, CHART_WIDTH, DEFAULT_WINDOW};
use crate::detection::Detect;
use crate::media::{FileBackend, MediaBackend, MediaKind, MediaSession};
use crate::pipeline::{FrameReport, Pipeline};
use crate::ticker::Ticker;
use crate::video::RgbFrame;

/// Default lines kept per text log.
pub const DEFAULT_LOG_LINES: usize = 1000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub tick_interval: Duration,
    /// Frames kept on the chart; `None` keeps the whole session.
    pub chart_window: Option<usize>,
    pub log_lines: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(30),
            chart_window: Some(DEFAULT_WINDOW),
            log_lines: DEFAULT_LOG_LINES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loaded,
    Playing,
    Closed,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Not playing, or the next tick is not due yet.
    Idle,
    Frame(FrameReport),
    EndOfStream,
}

/// Append-only text panel that forgets its oldest lines past `capacity`.
#[derive(Debug, Clone)]
pub struct TextLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl TextLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn lines(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Everything the front end shows.
#[derive(Debug, Clone)]
pub struct View {
    pub count_label: String,
    pub param_log: TextLog,
    pub coord_log: TextLog,
    /// Annotated frame fitted to the display surface.
    pub frame: Option<RgbFrame>,
    pub chart: RgbFrame,
    /// Bumped whenever `frame` or `chart` change, so front ends can skip
    /// re-uploading textures.
    pub revision: u64,
}

pub fn count_label(count: usize) -> String {
    format!("Fish Count: {count}")
}

pub fn coord_line((x, y): (i32, i32)) -> String {
    format!("x: {x}, y: {y}")
}

pub struct App<D, B = FileBackend> {
    pipeline: Pipeline<D>,
    backend: B,
    session: Option<MediaSession>,
    ticker: Ticker,
    aggregator: Aggregator,
    view: View,
    state: PlaybackState,
}

impl<D: Detect> App<D> {
    pub fn new(detector: D, settings: Settings) -> Self {
        Self::with_backend(detector, FileBackend, settings)
    }
}

impl<D: Detect, B: MediaBackend> App<D, B> {
    pub fn with_backend(detector: D, backend: B, settings: Settings) -> Self {
        let aggregator = Aggregator::new(settings.chart_window);
        let chart = aggregator.render_chart(CHART_WIDTH, CHART_HEIGHT);
        Self {
            pipeline: Pipeline::new(detector),
            backend,
            session: None,
            ticker: Ticker::new(settings.tick_interval),
            aggregator,
            view: View {
                count_label: count_label(0),
                param_log: TextLog::new(settings.log_lines),
                coord_log: TextLog::new(settings.log_lines),
                frame: None,
                chart,
                revision: 0,
            },
            state: PlaybackState::Idle,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn session(&self) -> Option<&MediaSession> {
        self.session.as_ref()
    }

    /// When the front end should call `tick` next, if playing.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.ticker.next_due()
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        self.session
            .as_ref()
            .map(|s| self.aggregator.summary(s.path().to_path_buf(), s.kind()))
    }

    /// Load `path`, replacing any current session.  Unsupported extensions
    /// are rejected before anything is torn down.  Stills are processed
    /// immediately.
    pub fn select_file(&mut self, path: &Path) -> Result<()> {
        if self.state == PlaybackState::Closed {
            return Ok(());
        }
        let kind = MediaKind::from_path(path)?;

        self.ticker.stop();
        if let Some(mut prior) = self.session.take() {
            prior.release();
        }
        self.state = PlaybackState::Idle;
        self.aggregator.reset();
        self.pipeline.reset();
        self.redraw_chart();

        let session = MediaSession::open(path, &self.backend)?;
        self.view
            .param_log
            .push(format!("loaded {} ({kind})", path.display()));
        self.session = Some(session);
        self.state = PlaybackState::Loaded;

        if kind == MediaKind::Image {
            if self.process_next()?.is_none() {
                warn!(path = %path.display(), "still image produced no frame");
            }
            if let Some(session) = self.session.as_mut() {
                session.release();
            }
        }
        Ok(())
    }

    /// Begin playback.  Only a loaded video with its capture still open can
    /// start; anything else is a no-op.  Returns whether playback started.
    pub fn start(&mut self) -> bool {
        if self.state != PlaybackState::Loaded || self.ticker.is_active() {
            return false;
        }
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        if !session.is_video() || !session.has_capture() {
            return false;
        }
        self.ticker.start(Instant::now());
        self.state = PlaybackState::Playing;
        info!(path = %session.path().display(), "playback started");
        self.view.param_log.push("playback started");
        true
    }

    /// Stop playback and release the capture handle.
    pub fn stop(&mut self) {
        self.ticker.stop();
        if let Some(session) = self.session.as_mut() {
            if session.release() && session.is_video() {
                self.view.param_log.push(format!(
                    "playback stopped after {} frames, capture released",
                    session.frames_read()
                ));
            }
        }
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Loaded;
            info!(frames = self.aggregator.frames(), "playback stopped");
        }
    }

    /// Process one frame if a tick is due at `now`.  A processing failure
    /// stops playback before the error is returned.
    pub fn tick(&mut self, now: Instant) -> Result<TickOutcome> {
        if self.state != PlaybackState::Playing || !self.ticker.poll(now) {
            return Ok(TickOutcome::Idle);
        }
        match self.process_next() {
            Ok(Some(report)) => Ok(TickOutcome::Frame(report)),
            Ok(None) => {
                info!(frames = self.aggregator.frames(), "end of stream");
                self.stop();
                Ok(TickOutcome::EndOfStream)
            }
            Err(e) => {
                self.stop();
                Err(e)
            }
        }
    }

    /// Stop, drop the session and refuse further commands.
    pub fn close(&mut self) {
        if self.state == PlaybackState::Closed {
            return;
        }
        self.stop();
        self.session = None;
        self.state = PlaybackState::Closed;
        info!("application closed");
    }

    fn process_next(&mut self) -> Result<Option<FrameReport>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        let Some(frame) = session.read_next_frame()? else {
            return Ok(None);
        };

        let (report, display) = self.pipeline.process(frame)?;

        self.view.count_label = count_label(report.count());
        for center in report.centers() {
            self.view.coord_log.push(coord_line(center));
        }
        self.view.param_log.push(format!(
            "frame {}: {}x{}x{}, {} detections",
            report.index,
            report.width,
            report.height,
            RgbFrame::CHANNELS,
            report.count()
        ));
        self.aggregator
            .record(u32::try_from(report.count()).unwrap_or(u32::MAX));
        self.redraw_chart();
        self.view.frame = Some(display);

        Ok(Some(report))
    }

    fn redraw_chart(&mut self) {
        self.view.chart = self.aggregator.render_chart(CHART_WIDTH, CHART_HEIGHT);
        self.view.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_log_evicts_oldest() {
        let mut log = TextLog::new(2);
        log.push("a");
        log.push("b");
        log.push("c");
        assert_eq!(log.lines().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(log.len(), 2);
        assert!(!log.is_empty());
    }

    #[test]
    fn labels() {
        assert_eq!(count_label(3), "Fish Count: 3");
        assert_eq!(coord_line((12, -4)), "x: 12, y: -4");
    }
}
