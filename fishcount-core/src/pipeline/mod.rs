use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::detection::{BBox, Detect};
use crate::rendering::{self, FrameRenderer};
use crate::video::RgbFrame;

/// What one processed frame produced.
#[derive(Debug, Clone)]
pub struct FrameReport {
    /// 1-based index within the session.
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<BBox>,
}

impl FrameReport {
    pub fn count(&self) -> usize {
        self.detections.len()
    }

    /// Integer box midpoints, in detection order.
    pub fn centers(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.detections.iter().map(BBox::center_px)
    }
}

pub struct Analyzer<D> {
    detector: D,
    prof_frames: u64,
    prof_detect: Duration,
}

impl<D: Detect> Analyzer<D> {
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            prof_frames: 0,
            prof_detect: Duration::ZERO,
        }
    }

    pub fn analyze(&mut self, frame: &RgbFrame) -> Result<Vec<BBox>> {
        let detect_start = Instant::now();
        let result = self.detector.detect(frame);
        self.prof_detect += detect_start.elapsed();
        self.prof_frames += 1;

        if self.prof_frames % 300 == 0 {
            tracing::info!(
                frames = self.prof_frames,
                detect_ms_per_frame = format!(
                    "{:.2}",
                    self.prof_detect.as_secs_f64() * 1000.0 / self.prof_frames as f64
                ),
                "pipeline analyze timings"
            );
        }

        result.context("detection failed")
    }
}

pub struct Renderer {
    renderer: FrameRenderer,
    prof_frames: u64,
    prof_render: Duration,
}

impl Renderer {
    pub fn new(renderer: FrameRenderer) -> Self {
        Self {
            renderer,
            prof_frames: 0,
            prof_render: Duration::ZERO,
        }
    }

    /// Draw `boxes` onto `frame` and fit it to the display surface.
    pub fn render(&mut self, frame: RgbFrame, boxes: &[BBox]) -> Result<RgbFrame> {
        let render_start = Instant::now();
        let result = rendering::annotate(frame, boxes).and_then(|mut annotated| {
            self.renderer.letterbox_inplace(&mut annotated)?;
            Ok(annotated)
        });
        self.prof_render += render_start.elapsed();
        self.prof_frames += 1;

        if self.prof_frames % 300 == 0 {
            tracing::info!(
                frames = self.prof_frames,
                render_ms_per_frame = format!(
                    "{:.2}",
                    self.prof_render.as_secs_f64() * 1000.0 / self.prof_frames as f64
                ),
                "pipeline render timings"
            );
        }

        result.context("rendering failed")
    }
}

pub struct Pipeline<D> {
    analyzer: Analyzer<D>,
    renderer: Renderer,
    frame_index: u64,
}

impl<D: Detect> Pipeline<D> {
    pub fn new(detector: D) -> Self {
        Self {
            analyzer: Analyzer::new(detector),
            renderer: Renderer::new(FrameRenderer::new()),
            frame_index: 0,
        }
    }

    /// Restart frame numbering for a new session.
    pub fn reset(&mut self) {
        self.frame_index = 0;
    }

    /// Detect on `frame`, then turn it into the annotated display frame.
    pub fn process(&mut self, frame: RgbFrame) -> Result<(FrameReport, RgbFrame)> {
        let detections = self.analyzer.analyze(&frame)?;
        self.frame_index += 1;
        let report = FrameReport {
            index: self.frame_index,
            width: frame.width,
            height: frame.height,
            detections,
        };
        let display = self.renderer.render(frame, &report.detections)?;
        tracing::debug!(
            frame = report.index,
            count = report.count(),
            "frame processed"
        );
        Ok((report, display))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::{DISPLAY_HEIGHT, DISPLAY_WIDTH};

    struct Fixed(Vec<BBox>);

    impl Detect for Fixed {
        fn detect(&mut self, _frame: &RgbFrame) -> Result<Vec<BBox>> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl Detect for Broken {
        fn detect(&mut self, _frame: &RgbFrame) -> Result<Vec<BBox>> {
            anyhow::bail!("model exploded")
        }
    }

    #[test]
    fn process_reports_detections_and_fits_display() {
        let boxes = vec![
            BBox::new(0.0, 0.0, 10.0, 10.0),
            BBox::new(20.0, 30.0, 41.0, 50.0),
        ];
        let mut pipeline = Pipeline::new(Fixed(boxes));
        let (report, display) = pipeline.process(RgbFrame::solid(160, 120, [0; 3])).unwrap();

        assert_eq!(report.index, 1);
        assert_eq!((report.width, report.height), (160, 120));
        assert_eq!(report.count(), 2);
        assert_eq!(report.centers().collect::<Vec<_>>(), vec![(5, 5), (30, 40)]);
        assert_eq!((display.width, display.height), (DISPLAY_WIDTH, DISPLAY_HEIGHT));

        let (report, _) = pipeline.process(RgbFrame::solid(160, 120, [0; 3])).unwrap();
        assert_eq!(report.index, 2);
        pipeline.reset();
        let (report, _) = pipeline.process(RgbFrame::solid(160, 120, [0; 3])).unwrap();
        assert_eq!(report.index, 1);
    }

    #[test]
    fn malformed_frame_fails_rendering() {
        let mut frame = RgbFrame::solid(8, 8, [0; 3]);
        frame.data.truncate(5);
        let mut pipeline = Pipeline::new(Fixed(vec![BBox::new(1.0, 1.0, 4.0, 4.0)]));
        let err = pipeline.process(frame).unwrap_err();
        assert!(format!("{err:#}").contains("rendering failed"));
    }

    #[test]
    fn detector_failure_propagates() {
        let mut pipeline = Pipeline::new(Broken);
        let err = pipeline
            .process(RgbFrame::solid(8, 8, [0; 3]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("model exploded"));
    }
}
