//! video — decoded frames and the sources that produce them
//!
//! Still images are decoded with the `image` crate.  Videos go through an
//! FFmpeg bridge (behind the `ffmpeg` feature) that pulls one frame per call
//! instead of pushing every frame through a callback, so the caller's tick
//! decides the pace.

use anyhow::{Context, Result};
use image::RgbImage;
use std::path::Path;

use crate::media::MediaError;

/// A single decoded frame in RGB24 format, along with its presentation
/// timestamp (in the source stream's time-base units; 0 for stills).
#[derive(Clone)]
pub struct RgbFrame {
    pub data: Vec<u8>, // packed RGB24, row-major
    pub width: u32,
    pub height: u32,
    pub pts: i64,
}

impl RgbFrame {
    pub const CHANNELS: u32 = 3;

    /// Wrap a packed RGB24 buffer, checking it matches the stated dimensions.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, MediaError> {
        let frame = Self {
            data,
            width,
            height,
            pts: 0,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Non-empty, and the buffer holds exactly `width × height` RGB pixels.
    pub fn validate(&self) -> Result<(), MediaError> {
        let expected = self.width as usize * self.height as usize * Self::CHANNELS as usize;
        if self.width == 0 || self.height == 0 || self.data.len() != expected {
            return Err(MediaError::InvalidFrame {
                width: self.width,
                height: self.height,
                len: self.data.len(),
            });
        }
        Ok(())
    }

    /// A frame filled with one colour.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            data,
            width,
            height,
            pts: 0,
        }
    }

    pub fn from_image(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            pts: 0,
        }
    }

    /// Convert into an `RgbImage`, consuming the pixel buffer.
    pub fn into_image(self) -> Result<RgbImage, MediaError> {
        let len = self.data.len();
        RgbImage::from_raw(self.width, self.height, self.data).ok_or(MediaError::InvalidFrame {
            width: self.width,
            height: self.height,
            len,
        })
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }
}

impl std::fmt::Debug for RgbFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgbFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .finish_non_exhaustive()
    }
}

/// A sequential producer of frames.  `Ok(None)` means the stream is exhausted.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        (**self).next_frame()
    }
}

/// Decode a still image file into an RGB frame.
pub fn load_still<P: AsRef<Path>>(path: P) -> Result<RgbFrame> {
    let path = path.as_ref();
    let img = image::open(path)
        .with_context(|| format!("failed to decode image {}", path.display()))?
        .into_rgb8();
    let (width, height) = img.dimensions();
    RgbFrame::new(width, height, img.into_raw())
        .with_context(|| format!("unusable image {}", path.display()))
}

/// Encode a frame as an image file; the format follows the extension.
pub fn save_frame<P: AsRef<Path>>(frame: &RgbFrame, path: P) -> Result<()> {
    let path = path.as_ref();
    frame
        .clone()
        .into_image()?
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(feature = "ffmpeg")]
pub use capture::{total_frames, VideoCapture};

#[cfg(feature = "ffmpeg")]
mod capture {
    use anyhow::{Context, Result};
    use ffmpeg_next as ffmpeg;
    use ffmpeg_next::{codec, format, frame, media, software::scaling};
    use std::path::Path;
    use tracing::{debug, info};

    use super::{FrameSource, RgbFrame};

    /// Bilinear scaling for display frames.
    const SCALE_FLAGS: scaling::Flags = scaling::Flags::BILINEAR;

    /// An open video file decoded frame-by-frame to RGB24.
    pub struct VideoCapture {
        ictx: format::context::Input,
        video_stream_index: usize,
        decoder: ffmpeg::decoder::Video,
        to_rgb: scaling::Context,
        decoded_frame: frame::Video,
        rgb_frame: frame::Video,
        eof_sent: bool,
        frame_count: u64,
    }

    impl VideoCapture {
        pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
            ffmpeg::init().context("failed to initialise FFmpeg")?;
            let path = path.as_ref();

            let ictx = format::input(&path)
                .with_context(|| format!("could not open video {}", path.display()))?;

            let input_video_stream = ictx
                .streams()
                .best(media::Type::Video)
                .context("no video stream found in input")?;
            let video_stream_index = input_video_stream.index();

            let decoder_ctx =
                codec::context::Context::from_parameters(input_video_stream.parameters())
                    .context("failed to build decoder context")?;
            let decoder = decoder_ctx
                .decoder()
                .video()
                .context("failed to open video decoder")?;

            let src_width = decoder.width();
            let src_height = decoder.height();
            let src_pixel_fmt = decoder.format();

            info!(
                path = %path.display(),
                src_width,
                src_height,
                ?src_pixel_fmt,
                "opened input video stream"
            );

            let to_rgb = scaling::Context::get(
                src_pixel_fmt,
                src_width,
                src_height,
                format::Pixel::RGB24,
                src_width,
                src_height,
                SCALE_FLAGS,
            )
            .context("failed to create to-RGB scaler")?;

            Ok(Self {
                ictx,
                video_stream_index,
                decoder,
                to_rgb,
                decoded_frame: frame::Video::empty(),
                rgb_frame: frame::Video::empty(),
                eof_sent: false,
                frame_count: 0,
            })
        }

        /// Feed the decoder until it has a frame ready.  Returns `false` once
        /// the input is exhausted and the decoder has been told so.
        fn feed_decoder(&mut self) -> Result<bool> {
            if self.eof_sent {
                return Ok(false);
            }
            let mut packet = ffmpeg::Packet::empty();
            loop {
                match packet.read(&mut self.ictx) {
                    Ok(()) => {
                        if packet.stream() != self.video_stream_index {
                            continue;
                        }
                        self.decoder
                            .send_packet(&packet)
                            .context("decoder send_packet")?;
                        return Ok(true);
                    }
                    Err(ffmpeg::Error::Eof) => {
                        self.decoder.send_eof().context("decoder send_eof")?;
                        self.eof_sent = true;
                        return Ok(true);
                    }
                    Err(e) => return Err(e).context("failed to read packet"),
                }
            }
        }

        fn convert_decoded(&mut self) -> Result<RgbFrame> {
            self.to_rgb
                .run(&self.decoded_frame, &mut self.rgb_frame)
                .context("to-RGB scaling failed")?;

            let width = self.rgb_frame.width();
            let height = self.rgb_frame.height();
            let row_bytes = width as usize * 3;

            // Compact to a plain Vec<u8> (remove stride padding if any)
            let stride = self.rgb_frame.stride(0);
            let raw = self.rgb_frame.data(0);
            let mut rgb_data = Vec::with_capacity(row_bytes * height as usize);
            for row in 0..height as usize {
                let start = row * stride;
                rgb_data.extend_from_slice(
                    raw.get(start..start + row_bytes)
                        .context("decoded frame row is out of bounds")?,
                );
            }

            let pts = self
                .decoded_frame
                .pts()
                .unwrap_or(self.frame_count as i64);

            let mut rgb = RgbFrame::new(width, height, rgb_data)?;
            rgb.pts = pts;
            Ok(rgb)
        }
    }

    impl FrameSource for VideoCapture {
        fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
            loop {
                if self.decoder.receive_frame(&mut self.decoded_frame).is_ok() {
                    let rgb = self.convert_decoded()?;
                    self.frame_count += 1;
                    if self.frame_count % 100 == 0 {
                        debug!(frame_count = self.frame_count, "decoded frames");
                    }
                    return Ok(Some(rgb));
                }
                if !self.feed_decoder()? {
                    info!(frame_count = self.frame_count, "video stream drained");
                    return Ok(None);
                }
            }
        }
    }

    /// Return the approximate total frame count for a video file (used for
    /// progress reporting).  Falls back to 0 if the count cannot be determined.
    pub fn total_frames<P: AsRef<Path>>(input_path: P) -> u64 {
        ffmpeg::init().ok();
        let Ok(ictx) = format::input(&input_path) else {
            return 0;
        };
        let Some(stream) = ictx.streams().best(media::Type::Video) else {
            return 0;
        };
        // nb_frames is set by most muxers; fall back to duration × fps estimate.
        let nb = stream.frames();
        if nb > 0 {
            return nb as u64;
        }
        let dur = stream.duration(); // in stream time-base units
        let tb = stream.time_base();
        let fps = stream.avg_frame_rate();
        if dur > 0 && tb.denominator() > 0 && fps.numerator() > 0 && fps.denominator() > 0 {
            let seconds = dur as f64 * tb.numerator() as f64 / tb.denominator() as f64;
            let fps_f = fps.numerator() as f64 / fps.denominator() as f64;
            return (seconds * fps_f).round() as u64;
        }
        0
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_mismatched_buffer() {
        let err = RgbFrame::new(4, 4, vec![0; 10]).unwrap_err();
        assert!(matches!(
            err,
            MediaError::InvalidFrame {
                width: 4,
                height: 4,
                len: 10
            }
        ));
        assert!(RgbFrame::new(0, 4, Vec::new()).is_err());
        assert!(RgbFrame::new(2, 2, vec![0; 12]).is_ok());
    }

    #[test]
    fn still_image_survives_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        let frame = RgbFrame::solid(6, 4, [10, 200, 30]);
        save_frame(&frame, &path).unwrap();

        let loaded = load_still(&path).unwrap();
        assert_eq!((loaded.width, loaded.height), (6, 4));
        assert_eq!(loaded.pixel(5, 3), Some([10, 200, 30]));
        assert_eq!(loaded.pixel(6, 0), None);
    }

    #[test]
    fn validate_catches_a_tampered_buffer() {
        let mut frame = RgbFrame::solid(3, 2, [1, 2, 3]);
        assert!(frame.validate().is_ok());
        frame.data.pop();
        assert!(frame.validate().is_err());
    }

    #[test]
    fn corrupt_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();
        assert!(load_still(&path).is_err());
    }
}
