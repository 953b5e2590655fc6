pub mod aggregate;
pub mod app;
pub mod detection;
pub mod media;
pub mod pipeline;
pub mod rendering;
pub mod ticker;
pub mod video;

// Re-export the top-level error type so callers only need `fishcount_core::Error`
pub use anyhow::Error;
pub use anyhow::Result;

pub use app::{App, PlaybackState, Settings, TickOutcome};
pub use detection::{BBox, Detect};
pub use media::{MediaError, MediaKind};
pub use video::RgbFrame;
