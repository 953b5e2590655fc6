//! media — file classification and the open media session
//!
//! A `MediaSession` owns whatever was opened for the selected file: the
//! decoded still (handed out once) or the video capture handle.

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::video::{self, FrameSource, RgbFrame};

/// Extensions offered by the file picker, lower-case.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "png"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi"];

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("unsupported media format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("video support is not compiled in (enable the `ffmpeg` feature): {}", .0.display())]
    VideoUnavailable(PathBuf),
    #[error("frame buffer of {len} bytes does not match {width}x{height} RGB")]
    InvalidFrame { width: u32, height: u32, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a path by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, MediaError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| MediaError::UnsupportedFormat(path.to_path_buf()))?;

        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Ok(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Ok(Self::Video)
        } else {
            Err(MediaError::UnsupportedFormat(path.to_path_buf()))
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// How a session gets its pixels.  The file backend is the real one; tests
/// substitute scripted sources.
pub trait MediaBackend {
    fn open_image(&self, path: &Path) -> Result<RgbFrame>;
    fn open_video(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}

/// Decodes from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileBackend;

impl MediaBackend for FileBackend {
    fn open_image(&self, path: &Path) -> Result<RgbFrame> {
        video::load_still(path)
    }

    #[cfg(feature = "ffmpeg")]
    fn open_video(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(video::VideoCapture::open(path)?))
    }

    #[cfg(not(feature = "ffmpeg"))]
    fn open_video(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Err(MediaError::VideoUnavailable(path.to_path_buf()).into())
    }
}

enum Source {
    Still(Option<RgbFrame>),
    Video(Option<Box<dyn FrameSource>>),
}

/// The currently loaded file.
pub struct MediaSession {
    path: PathBuf,
    kind: MediaKind,
    source: Source,
    frames_read: u64,
}

impl MediaSession {
    pub fn open<B: MediaBackend + ?Sized>(path: &Path, backend: &B) -> Result<Self> {
        let kind = MediaKind::from_path(path)?;
        let source = match kind {
            MediaKind::Image => Source::Still(Some(backend.open_image(path)?)),
            MediaKind::Video => Source::Video(Some(backend.open_video(path)?)),
        };
        info!(path = %path.display(), %kind, "media session opened");
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            source,
            frames_read: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// True while a video capture handle is held.
    pub fn has_capture(&self) -> bool {
        matches!(self.source, Source::Video(Some(_)))
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Next frame, or `None` at end of stream.  A still yields its frame once.
    pub fn read_next_frame(&mut self) -> Result<Option<RgbFrame>> {
        let frame = match &mut self.source {
            Source::Still(slot) => slot.take(),
            Source::Video(Some(capture)) => capture.next_frame()?,
            Source::Video(None) => None,
        };
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }

    /// Drop the capture handle (or the pending still).  Idempotent; returns
    /// whether anything was still held.
    pub fn release(&mut self) -> bool {
        let held = match &mut self.source {
            Source::Still(slot) => slot.take().is_some(),
            Source::Video(capture) => capture.take().is_some(),
        };
        if held {
            debug!(path = %self.path.display(), frames = self.frames_read, "media released");
        }
        held
    }
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("has_capture", &self.has_capture())
            .field("frames_read", &self.frames_read)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Countdown(VecDeque<RgbFrame>);

    impl FrameSource for Countdown {
        fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
            Ok(self.0.pop_front())
        }
    }

    struct FakeBackend {
        video_frames: usize,
    }

    impl MediaBackend for FakeBackend {
        fn open_image(&self, _path: &Path) -> Result<RgbFrame> {
            Ok(RgbFrame::solid(4, 4, [1, 2, 3]))
        }

        fn open_video(&self, _path: &Path) -> Result<Box<dyn FrameSource>> {
            let frames = (0..self.video_frames)
                .map(|_| RgbFrame::solid(4, 4, [0, 0, 0]))
                .collect();
            Ok(Box::new(Countdown(frames)))
        }
    }

    #[test]
    fn classifies_supported_extensions() {
        assert_eq!(
            MediaKind::from_path(Path::new("a/photo.jpg")).unwrap(),
            MediaKind::Image
        );
        assert_eq!(
            MediaKind::from_path(Path::new("shot.PNG")).unwrap(),
            MediaKind::Image
        );
        assert_eq!(
            MediaKind::from_path(Path::new("clip.mp4")).unwrap(),
            MediaKind::Video
        );
        assert_eq!(
            MediaKind::from_path(Path::new("clip.AVI")).unwrap(),
            MediaKind::Video
        );
    }

    #[test]
    fn rejects_other_extensions() {
        for name in ["notes.txt", "clip.mkv", "photo.jpeg", "no_extension"] {
            let err = MediaKind::from_path(Path::new(name)).unwrap_err();
            assert!(matches!(err, MediaError::UnsupportedFormat(_)), "{name}");
        }
    }

    #[test]
    fn still_yields_exactly_once() {
        let backend = FakeBackend { video_frames: 0 };
        let mut session = MediaSession::open(Path::new("photo.jpg"), &backend).unwrap();
        assert!(!session.is_video());
        assert!(!session.has_capture());
        assert!(session.read_next_frame().unwrap().is_some());
        assert!(session.read_next_frame().unwrap().is_none());
        assert_eq!(session.frames_read(), 1);
    }

    #[test]
    fn video_ends_and_release_drops_capture() {
        let backend = FakeBackend { video_frames: 2 };
        let mut session = MediaSession::open(Path::new("clip.mp4"), &backend).unwrap();
        assert!(session.has_capture());
        assert!(session.read_next_frame().unwrap().is_some());
        assert!(session.read_next_frame().unwrap().is_some());
        assert!(session.read_next_frame().unwrap().is_none());

        assert_eq!(session.frames_read(), 2);
        assert!(session.release());
        assert!(!session.has_capture());
        assert!(session.read_next_frame().unwrap().is_none());
        assert!(!session.release());
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn file_backend_without_ffmpeg_reports_missing_video_support() {
        let err = FileBackend.open_video(Path::new("clip.mp4")).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<MediaError>(),
            Some(MediaError::VideoUnavailable(_))
        ));
    }
}
