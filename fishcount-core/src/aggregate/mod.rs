//! aggregate — per-frame detection counts and the running bar chart
//!
//! The charted series is a sliding window over the newest counts so long
//! videos do not grow it without bound; the session totals are kept
//! separately and never evicted.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;

use crate::media::MediaKind;
use crate::video::RgbFrame;

/// Fixed chart figure size.
pub const CHART_WIDTH: u32 = 400;
pub const CHART_HEIGHT: u32 = 200;
/// Default number of frames kept for charting.
pub const DEFAULT_WINDOW: usize = 500;

const CHART_BACKGROUND: [u8; 3] = [255, 255, 255];
const CHART_BAR: [u8; 3] = [31, 119, 180];
const CHART_AXIS: [u8; 3] = [0, 0, 0];
const CHART_MARGIN: u32 = 4;

#[derive(Debug, Clone)]
pub struct Aggregator {
    series: VecDeque<u32>,
    window: Option<usize>,
    frames: u64,
    detections: u64,
    peak: u32,
}

impl Aggregator {
    /// Keep at most `window` counts for charting; `None` keeps all of them.
    pub fn new(window: Option<usize>) -> Self {
        Self {
            series: VecDeque::new(),
            window: window.map(|w| w.max(1)),
            frames: 0,
            detections: 0,
            peak: 0,
        }
    }

    pub fn record(&mut self, count: u32) {
        if let Some(window) = self.window {
            while self.series.len() >= window {
                self.series.pop_front();
            }
        }
        self.series.push_back(count);
        self.frames += 1;
        self.detections += u64::from(count);
        self.peak = self.peak.max(count);
    }

    pub fn reset(&mut self) {
        self.series.clear();
        self.frames = 0;
        self.detections = 0;
        self.peak = 0;
    }

    /// The charted window, oldest first.
    pub fn series(&self) -> impl ExactSizeIterator<Item = u32> + '_ {
        self.series.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn total_detections(&self) -> u64 {
        self.detections
    }

    /// Highest count seen this session.
    pub fn peak(&self) -> u32 {
        self.peak
    }

    pub fn mean(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.detections as f64 / self.frames as f64
        }
    }

    /// Draw the windowed series as a bar chart, one bar per frame.
    pub fn render_chart(&self, width: u32, height: u32) -> RgbFrame {
        let width = width.max(CHART_MARGIN * 2 + 1);
        let height = height.max(CHART_MARGIN * 2 + 1);
        let mut img = RgbImage::from_pixel(width, height, Rgb(CHART_BACKGROUND));

        let plot_w = width - CHART_MARGIN * 2;
        let plot_h = height - CHART_MARGIN * 2;
        let baseline = (height - CHART_MARGIN) as f32;

        let window_peak = self.series.iter().copied().max().unwrap_or(0);
        if !self.is_empty() && window_peak > 0 {
            let n = self.len() as f32;
            let slot = plot_w as f32 / n;
            for (i, &count) in self.series.iter().enumerate() {
                if count == 0 {
                    continue;
                }
                let bar_h = ((count as f32 / window_peak as f32) * plot_h as f32)
                    .round()
                    .max(1.0) as u32;
                let x0 = CHART_MARGIN as f32 + i as f32 * slot;
                let x1 = CHART_MARGIN as f32 + (i + 1) as f32 * slot;
                // leave a one-pixel gap between wide bars
                let bar_w = if slot >= 3.0 { slot - 1.0 } else { x1 - x0 };
                let rect = Rect::at(x0.floor() as i32, (baseline as u32 - bar_h) as i32)
                    .of_size(bar_w.ceil().max(1.0) as u32, bar_h);
                draw_filled_rect_mut(&mut img, rect, Rgb(CHART_BAR));
            }
        }

        draw_line_segment_mut(
            &mut img,
            (CHART_MARGIN as f32, baseline),
            ((width - CHART_MARGIN) as f32, baseline),
            Rgb(CHART_AXIS),
        );
        draw_line_segment_mut(
            &mut img,
            (CHART_MARGIN as f32, CHART_MARGIN as f32),
            (CHART_MARGIN as f32, baseline),
            Rgb(CHART_AXIS),
        );

        RgbFrame::from_image(img)
    }

    pub fn summary(&self, path: PathBuf, kind: MediaKind) -> SessionSummary {
        SessionSummary {
            path,
            kind,
            frames: self.frames,
            total_detections: self.detections,
            peak: self.peak,
            mean: self.mean(),
            series: self.series.iter().copied().collect(),
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(Some(DEFAULT_WINDOW))
    }
}

/// Digest of one media session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub frames: u64,
    pub total_detections: u64,
    pub peak: u32,
    pub mean: f64,
    pub series: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order_and_resets() {
        let mut agg = Aggregator::new(None);
        for c in [3, 0, 5] {
            agg.record(c);
        }
        assert_eq!(agg.series().collect::<Vec<_>>(), vec![3, 0, 5]);
        assert_eq!(agg.total_detections(), 8);
        assert_eq!(agg.peak(), 5);

        agg.reset();
        assert!(agg.is_empty());
        assert_eq!(agg.frames(), 0);
        assert_eq!(agg.mean(), 0.0);
    }

    #[test]
    fn window_evicts_oldest_but_totals_keep_counting() {
        let mut agg = Aggregator::new(Some(3));
        for c in 1..=5 {
            agg.record(c);
        }
        assert_eq!(agg.series().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(agg.frames(), 5);
        assert_eq!(agg.total_detections(), 15);
        assert_eq!(agg.mean(), 3.0);
    }

    #[test]
    fn chart_has_fixed_size_and_scales_to_peak() {
        let mut agg = Aggregator::new(None);
        agg.record(2);
        agg.record(4);
        let chart = agg.render_chart(CHART_WIDTH, CHART_HEIGHT);
        assert_eq!((chart.width, chart.height), (CHART_WIDTH, CHART_HEIGHT));

        // second bar reaches the top of the plot area, first only half way
        let top = CHART_MARGIN + 1;
        assert_eq!(chart.pixel(300, top), Some(CHART_BAR));
        assert_eq!(chart.pixel(100, top), Some(CHART_BACKGROUND));
        assert_eq!(chart.pixel(100, CHART_HEIGHT - CHART_MARGIN - 2), Some(CHART_BAR));
    }

    #[test]
    fn empty_chart_is_blank_axes() {
        let chart = Aggregator::default()
            .render_chart(CHART_WIDTH, CHART_HEIGHT);
        assert_eq!(chart.pixel(200, 100), Some(CHART_BACKGROUND));
        assert_eq!(
            chart.pixel(200, CHART_HEIGHT - CHART_MARGIN),
            Some(CHART_AXIS)
        );
    }

    #[test]
    fn summary_serializes_to_json() {
        let mut agg = Aggregator::default();
        agg.record(1);
        agg.record(2);
        let summary = agg.summary(PathBuf::from("clip.mp4"), MediaKind::Video);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["kind"], "video");
        assert_eq!(json["frames"], 2);
        assert_eq!(json["series"], serde_json::json!([1, 2]));
    }
}
