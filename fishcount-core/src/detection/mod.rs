//! detection — YOLOv8 object detection behind the `Detect` seam
//!
//! The ONNX detector (feature `onnx`) loads a YOLOv8 export, runs inference
//! on a 640×640 resize of the frame and returns boxes in source-frame pixel
//! coordinates after NMS.

use anyhow::Result;

use crate::video::RgbFrame;

// ── Constants ────────────────────────────────────────────────────────────────

/// Minimum class score for a proposal to be kept.
pub const CONF_THRESHOLD: f32 = 0.25;
/// IoU threshold for NMS.
pub const IOU_THRESHOLD: f32 = 0.45;

// ── Public types ─────────────────────────────────────────────────────────────

/// Axis-aligned bounding box in pixel coordinates of the original frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence: 1.0,
            class_id: 0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
    /// Integer pixel midpoint: corners are truncated first, then the sum is
    /// floor-divided, so odd extents land on the lower pixel.
    pub fn center_px(&self) -> (i32, i32) {
        (
            (self.x1 as i32 + self.x2 as i32).div_euclid(2),
            (self.y1 as i32 + self.y2 as i32).div_euclid(2),
        )
    }
    /// IoU (intersection over union) with another box.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.width() * self.height() + other.width() * other.height() - inter;
        inter / union
    }
}

/// Anything that turns a frame into boxes.
pub trait Detect {
    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<BBox>>;
}

impl<D: Detect + ?Sized> Detect for Box<D> {
    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<BBox>> {
        (**self).detect(frame)
    }
}

// ── Non-Maximum Suppression ──────────────────────────────────────────────────

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes of
/// the same class.
pub fn nms(mut boxes: Vec<BBox>, iou_thresh: f32) -> Vec<BBox> {
    boxes.sort_unstable_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BBox> = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        kept.push(boxes[i]);
        for j in (i + 1)..boxes.len() {
            if boxes[i].class_id == boxes[j].class_id && boxes[i].iou(&boxes[j]) > iou_thresh {
                suppressed[j] = true;
            }
        }
    }

    kept
}

// ── ONNX detector ────────────────────────────────────────────────────────────

/// Shape of the exported model.
#[derive(Debug, Clone, Copy)]
pub struct YoloConfig {
    /// Square model input size.
    pub input_size: u32,
    /// Number of class score rows in the output.
    pub num_classes: usize,
    /// Keep only this class, if set.
    pub target_class: Option<usize>,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            num_classes: 1,
            target_class: None,
        }
    }
}

#[cfg(feature = "onnx")]
pub use onnx::YoloDetector;

#[cfg(feature = "onnx")]
mod onnx {
    use anyhow::{bail, Context, Result};
    use fast_image_resize as fr;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use rayon::prelude::*;
    use std::path::Path;
    use std::time::Instant;
    use tracing::{debug, info};

    use super::{nms, BBox, Detect, YoloConfig, CONF_THRESHOLD, IOU_THRESHOLD};
    use crate::video::RgbFrame;

    /// For very high-resolution inputs, run detection on a downscaled frame
    /// and map detections back to source coordinates.
    const DETECTION_MAX_DIM: u32 = 1920;

    /// Wraps the YOLOv8 ONNX session.
    pub struct YoloDetector {
        session: Session,
        config: YoloConfig,
        resizer: fr::Resizer,
        resize_buf: Vec<u8>,
        downscale_resizer: fr::Resizer,
        downscale_buf: Vec<u8>,
    }

    impl YoloDetector {
        /// Load a YOLOv8 ONNX model from `model_path`.
        pub fn load<P: AsRef<Path>>(model_path: P, config: YoloConfig) -> Result<Self> {
            let model_path = model_path.as_ref();
            if config.input_size == 0 || config.num_classes == 0 {
                bail!("model input size and class count must be non-zero");
            }
            let started = Instant::now();
            let session = build_ort_session(model_path)?;
            info!(
                path = %model_path.display(),
                classes = config.num_classes,
                load_ms = started.elapsed().as_millis() as u64,
                "detection model loaded"
            );
            let side = config.input_size;
            Ok(Self {
                session,
                config,
                resizer: fr::Resizer::new(),
                resize_buf: vec![0u8; (side * side * 3) as usize],
                downscale_resizer: fr::Resizer::new(),
                downscale_buf: Vec::new(),
            })
        }

        fn detect_native(&mut self, frame: &RgbFrame) -> Result<Vec<BBox>> {
            let input_tensor = self.preprocess(frame)?;

            let outputs = self
                .session
                .run(ort::inputs!["images" => input_tensor])
                .context("YOLOv8 inference failed")?;

            // YOLOv8 output: [1, 4 + classes, proposals]
            let (_shape, data) = outputs["output0"]
                .try_extract_tensor::<f32>()
                .context("failed to extract YOLOv8 output tensor")?;

            let num_classes = self.config.num_classes;
            let rows = 4 + num_classes;
            if data.is_empty() || data.len() % rows != 0 {
                bail!(
                    "unexpected YOLOv8 output length {} for {} classes",
                    data.len(),
                    num_classes
                );
            }
            let num_proposals = data.len() / rows;

            let side = self.config.input_size as f32;
            let scale_x = frame.width as f32 / side;
            let scale_y = frame.height as f32 / side;
            let target_class = self.config.target_class;

            let candidates: Vec<BBox> = (0..num_proposals)
                .into_par_iter()
                .filter_map(|i| {
                    // Data layout: [cx, cy, w, h, cls0_score, cls1_score, ...]
                    // Stored column-major across the rows.
                    let cx = data[i];
                    let cy = data[num_proposals + i];
                    let w = data[2 * num_proposals + i];
                    let h = data[3 * num_proposals + i];

                    let mut best_class = 0usize;
                    let mut best_score = 0f32;
                    for c in 0..num_classes {
                        let s = data[(4 + c) * num_proposals + i];
                        if s > best_score {
                            best_score = s;
                            best_class = c;
                        }
                    }

                    if best_score < CONF_THRESHOLD {
                        return None;
                    }
                    if target_class.is_some_and(|t| t != best_class) {
                        return None;
                    }

                    // (cx,cy,w,h) in model space → (x1,y1,x2,y2) in original frame
                    let x1 = (cx - w / 2.0) * scale_x;
                    let y1 = (cy - h / 2.0) * scale_y;
                    let x2 = (cx + w / 2.0) * scale_x;
                    let y2 = (cy + h / 2.0) * scale_y;

                    Some(BBox {
                        x1: x1.max(0.0),
                        y1: y1.max(0.0),
                        x2: x2.min(frame.width as f32),
                        y2: y2.min(frame.height as f32),
                        confidence: best_score,
                        class_id: best_class,
                    })
                })
                .collect();

            let kept = nms(candidates, IOU_THRESHOLD);
            debug!(proposals = num_proposals, kept = kept.len(), "detections decoded");
            Ok(kept)
        }

        fn preprocess(&mut self, frame: &RgbFrame) -> Result<ort::value::DynValue> {
            let side = self.config.input_size;
            let src = fr::images::ImageRef::new(
                frame.width,
                frame.height,
                &frame.data,
                fr::PixelType::U8x3,
            )
            .context("failed to create fast_image_resize source")?;

            let mut dst = fr::images::Image::from_vec_u8(
                side,
                side,
                std::mem::take(&mut self.resize_buf),
                fr::PixelType::U8x3,
            )
            .context("failed to create fast_image_resize destination")?;

            let options = fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
            self.resizer
                .resize(&src, &mut dst, Some(&options))
                .context("fast_image_resize model-input resize failed")?;

            self.resize_buf = dst.into_vec();
            let raw = &self.resize_buf;

            // NCHW float tensor: [1, 3, side, side].
            let size = (side * side) as usize;
            let mut tensor_data = vec![0f32; 3 * size];
            tensor_data
                .par_chunks_mut(size)
                .enumerate()
                .for_each(|(channel, plane)| {
                    for (idx, out) in plane.iter_mut().enumerate() {
                        *out = raw[idx * 3 + channel] as f32 / 255.0;
                    }
                });

            let shape = [1usize, 3, side as usize, side as usize];
            Ok(Tensor::from_array((shape, tensor_data.into_boxed_slice()))
                .context("failed to create YOLO input tensor")?
                .into_dyn())
        }

        fn downscale_frame(&mut self, frame: &RgbFrame, out_w: u32, out_h: u32) -> Result<RgbFrame> {
            let src = fr::images::ImageRef::new(
                frame.width,
                frame.height,
                &frame.data,
                fr::PixelType::U8x3,
            )
            .context("failed to create detection downscale source")?;

            let out_len = (out_w * out_h * 3) as usize;
            if self.downscale_buf.len() != out_len {
                self.downscale_buf.resize(out_len, 0);
            }

            let mut dst = fr::images::Image::from_vec_u8(
                out_w,
                out_h,
                std::mem::take(&mut self.downscale_buf),
                fr::PixelType::U8x3,
            )
            .context("failed to create detection downscale destination")?;

            let options = fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
            self.downscale_resizer
                .resize(&src, &mut dst, Some(&options))
                .context("failed to downscale frame for detection")?;

            Ok(RgbFrame {
                data: dst.into_vec(),
                width: out_w,
                height: out_h,
                pts: frame.pts,
            })
        }
    }

    impl Detect for YoloDetector {
        /// Run inference on `frame` and return bounding boxes (in original
        /// frame pixel coordinates) after NMS.
        fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<BBox>> {
            let max_dim = frame.width.max(frame.height);
            if max_dim > DETECTION_MAX_DIM {
                let scale = DETECTION_MAX_DIM as f32 / max_dim as f32;
                let scaled_w = ((frame.width as f32 * scale).round() as u32).max(1);
                let scaled_h = ((frame.height as f32 * scale).round() as u32).max(1);
                let mut scaled = self.downscale_frame(frame, scaled_w, scaled_h)?;
                let mut boxes = self.detect_native(&scaled)?;
                self.downscale_buf = std::mem::take(&mut scaled.data);
                let sx = scaled_w as f32 / frame.width as f32;
                let sy = scaled_h as f32 / frame.height as f32;
                for b in &mut boxes {
                    b.x1 /= sx;
                    b.x2 /= sx;
                    b.y1 /= sy;
                    b.y2 /= sy;
                }
                return Ok(boxes);
            }

            self.detect_native(frame)
        }
    }

    fn build_ort_session(model_path: &Path) -> Result<Session> {
        let model_bytes = std::fs::read(model_path)
            .with_context(|| format!("failed to read model file {}", model_path.display()))?;
        Session::builder()
            .context("failed to create ORT session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("failed to set ORT optimization level")?
            .with_intra_threads(1)
            .context("failed to set ORT intra threads")?
            .commit_from_memory(&model_bytes)
            .context("failed to load YOLOv8 ONNX model")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: usize) -> BBox {
        BBox {
            confidence,
            class_id,
            ..BBox::new(x1, y1, x2, y2)
        }
    }

    #[test]
    fn center_truncates_corners_then_floors() {
        assert_eq!(BBox::new(10.0, 20.0, 15.0, 27.0).center_px(), (12, 23));

        assert_eq!(BBox::new(0.0, 0.0, 5.0, 3.0).center_px(), (2, 1));
        assert_eq!(BBox::new(100.5, 40.0, 120.0, 61.0).center_px(), (110, 50));
        assert_eq!(BBox::new(10.9, 10.9, 11.9, 11.9).center_px(), (10, 10));

        // boxes hanging off the left edge floor towards negative infinity
        assert_eq!(BBox::new(-3.0, -1.0, 0.0, 4.0).center_px(), (-2, 1));
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);

        let half = BBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&half) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_best_of_overlapping_boxes() {
        let boxes = vec![
            scored(0.0, 0.0, 10.0, 10.0, 0.6, 0),
            scored(1.0, 1.0, 11.0, 11.0, 0.9, 0),
            scored(50.0, 50.0, 60.0, 60.0, 0.3, 0),
        ];
        let kept = nms(boxes, IOU_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.3);
    }

    #[test]
    fn nms_does_not_suppress_across_classes() {
        let boxes = vec![
            scored(0.0, 0.0, 10.0, 10.0, 0.8, 0),
            scored(0.0, 0.0, 10.0, 10.0, 0.7, 1),
        ];
        assert_eq!(nms(boxes, IOU_THRESHOLD).len(), 2);
    }
}
