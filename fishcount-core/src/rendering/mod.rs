//! rendering — box overlays and the fixed-size display surface
//!
//! Detections are drawn onto the decoded frame, then the annotated frame is
//! letterboxed into the `DISPLAY_WIDTH × DISPLAY_HEIGHT` viewport.

use anyhow::{Context, Result};
use fast_image_resize as fr;
use image::Rgb;
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detection::BBox;
use crate::video::RgbFrame;

/// Display surface resolution.
pub const DISPLAY_WIDTH: u32 = 800;
pub const DISPLAY_HEIGHT: u32 = 600;

/// Box outline colour.
pub const BOX_COLOR: [u8; 3] = [0, 255, 0];
/// Centre marker colour.
pub const CENTER_COLOR: [u8; 3] = [255, 0, 0];
const CENTER_RADIUS: i32 = 3;

/// Draw bounding boxes and their centre points onto a frame in-place.
pub fn draw_boxes(frame: &mut RgbFrame, boxes: &[BBox], color: [u8; 3]) -> Result<()> {
    frame.validate().context("annotating frame")?;
    // Build the image from the existing buffer without cloning; written back in place.
    let pts = frame.pts;
    let mut img = std::mem::replace(frame, RgbFrame::solid(0, 0, [0; 3]))
        .into_image()
        .context("annotating frame")?;

    for bbox in boxes {
        let w = bbox.width().round().max(1.0) as u32;
        let h = bbox.height().round().max(1.0) as u32;
        let rect = Rect::at(bbox.x1.round() as i32, bbox.y1.round() as i32).of_size(w, h);
        draw_hollow_rect_mut(&mut img, rect, Rgb(color));
        draw_filled_circle_mut(&mut img, bbox.center_px(), CENTER_RADIUS, Rgb(CENTER_COLOR));
    }

    *frame = RgbFrame::from_image(img);
    frame.pts = pts;
    Ok(())
}

/// Outline every detection and mark its centre.
pub fn annotate(mut frame: RgbFrame, boxes: &[BBox]) -> Result<RgbFrame> {
    draw_boxes(&mut frame, boxes, BOX_COLOR)?;
    Ok(frame)
}

/// Reusable letterboxing context to avoid per-frame allocations.
pub struct FrameRenderer {
    resizer: fr::Resizer,
    out_width: u32,
    out_height: u32,
    out_buf: Vec<u8>,
    scaled_buf: Vec<u8>,
}

impl FrameRenderer {
    /// Renderer for the standard display surface.
    pub fn new() -> Self {
        Self {
            resizer: fr::Resizer::new(),
            out_width: DISPLAY_WIDTH,
            out_height: DISPLAY_HEIGHT,
            out_buf: Vec::new(),
            scaled_buf: Vec::new(),
        }
    }

    /// Scale uniformly to fit the output size and pad with black bars.
    pub fn letterbox_inplace(&mut self, frame: &mut RgbFrame) -> Result<()> {
        let (out_w, out_h) = (self.out_width, self.out_height);
        let src_aspect = frame.width as f32 / frame.height as f32;
        let dst_aspect = out_w as f32 / out_h as f32;

        let (scaled_w, scaled_h) = if src_aspect > dst_aspect {
            (out_w, (out_w as f32 / src_aspect) as u32)
        } else {
            ((out_h as f32 * src_aspect) as u32, out_h)
        };

        let scaled_w = scaled_w.clamp(1, out_w);
        let scaled_h = scaled_h.clamp(1, out_h);

        let src =
            fr::images::ImageRef::new(frame.width, frame.height, &frame.data, fr::PixelType::U8x3)
                .context("failed to create fast_image_resize source for letterbox")?;

        let scaled_len = (scaled_w * scaled_h * 3) as usize;
        if self.scaled_buf.len() != scaled_len {
            self.scaled_buf.resize(scaled_len, 0);
        }
        let mut dst = fr::images::Image::from_vec_u8(
            scaled_w,
            scaled_h,
            std::mem::take(&mut self.scaled_buf),
            fr::PixelType::U8x3,
        )
        .context("failed to create fast_image_resize destination for letterbox")?;

        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::CatmullRom));
        self.resizer
            .resize(&src, &mut dst, Some(&options))
            .context("fast_image_resize letterbox scale failed")?;

        self.scaled_buf = dst.into_vec();
        let scaled_data = &self.scaled_buf;

        let offset_x = ((out_w - scaled_w) / 2) as usize;
        let offset_y = ((out_h - scaled_h) / 2) as usize;
        let canvas_stride = (out_w * 3) as usize;
        let scaled_stride = (scaled_w * 3) as usize;

        let out_len = canvas_stride * out_h as usize;
        self.out_buf.resize(out_len, 0);
        self.out_buf.fill(0);
        for row in 0..scaled_h as usize {
            let dst_start = (offset_y + row) * canvas_stride + offset_x * 3;
            let src_start = row * scaled_stride;
            self.out_buf[dst_start..dst_start + scaled_stride]
                .copy_from_slice(&scaled_data[src_start..src_start + scaled_stride]);
        }

        std::mem::swap(&mut frame.data, &mut self.out_buf);
        frame.width = out_w;
        frame.height = out_h;
        Ok(())
    }
}

impl Default for FrameRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn near(px: Option<[u8; 3]>, want: [u8; 3]) -> bool {
        px.is_some_and(|p| p.iter().zip(want).all(|(a, b)| a.abs_diff(b) <= 2))
    }

    #[test]
    fn annotate_draws_outline_and_center() {
        let mut frame = RgbFrame::solid(40, 30, [0, 0, 0]);
        frame.pts = 7;
        let boxes = [BBox::new(5.0, 5.0, 25.0, 21.0)];
        let out = annotate(frame, &boxes).unwrap();

        assert_eq!(out.pts, 7);
        assert_eq!(out.pixel(5, 5), Some(BOX_COLOR));
        assert_eq!(out.pixel(24, 10), Some(BOX_COLOR));
        assert_eq!(out.pixel(15, 13), Some(CENTER_COLOR));
        assert_eq!(out.pixel(0, 0), Some([0, 0, 0]));
    }

    #[test]
    fn annotate_tolerates_boxes_past_the_edge() {
        let frame = RgbFrame::solid(10, 10, [9, 9, 9]);
        let boxes = [BBox::new(-4.0, 6.0, 30.0, 30.0)];
        let out = annotate(frame, &boxes).unwrap();
        assert_eq!((out.width, out.height), (10, 10));
    }

    #[test]
    fn malformed_frame_is_rejected_and_left_intact() {
        let mut frame = RgbFrame::solid(4, 4, [7, 7, 7]);
        frame.data.truncate(10);
        frame.pts = 42;

        let err = draw_boxes(&mut frame, &[BBox::new(0.0, 0.0, 2.0, 2.0)], BOX_COLOR).unwrap_err();
        assert!(format!("{err:#}").contains("4x4"));
        assert_eq!((frame.width, frame.height, frame.pts), (4, 4, 42));
        assert_eq!(frame.data, vec![7; 10]);
    }

    #[test]
    fn wide_frame_gets_bars_top_and_bottom() {
        let mut out = RgbFrame::solid(1600, 400, [200, 200, 200]);
        FrameRenderer::new().letterbox_inplace(&mut out).unwrap();
        assert_eq!((out.width, out.height), (DISPLAY_WIDTH, DISPLAY_HEIGHT));
        assert_eq!(out.data.len(), (DISPLAY_WIDTH * DISPLAY_HEIGHT * 3) as usize);
        // scaled to 800×200, centred vertically
        assert_eq!(out.pixel(400, 10), Some([0, 0, 0]));
        assert!(near(out.pixel(400, 300), [200, 200, 200]));
        assert_eq!(out.pixel(400, 590), Some([0, 0, 0]));
    }

    #[test]
    fn tall_frame_gets_bars_left_and_right() {
        let frame = RgbFrame::solid(100, 300, [50, 60, 70]);
        let mut renderer = FrameRenderer::new();
        let mut out = frame.clone();
        renderer.letterbox_inplace(&mut out).unwrap();
        assert_eq!((out.width, out.height), (DISPLAY_WIDTH, DISPLAY_HEIGHT));
        // scaled to 200×600, centred horizontally
        assert_eq!(out.pixel(10, 300), Some([0, 0, 0]));
        assert!(near(out.pixel(400, 300), [50, 60, 70]));

        // buffers are reused across calls
        let mut again = frame;
        renderer.letterbox_inplace(&mut again).unwrap();
        assert!(near(again.pixel(400, 300), [50, 60, 70]));
    }
}
