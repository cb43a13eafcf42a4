//! Animated WebP playback.
//!
//! [`WebpAnimator`] parses a WebP bitstream, decodes frames on a background
//! [`Executor`], and presents them to a [`DisplaySink`] on the cadence encoded
//! in the file, driven by a [`FrameClock`]. The sink is held weakly; playback
//! stops by itself once it goes away.

pub mod error;
pub mod media;
pub mod runtime;
pub mod settings;

#[cfg(test)]
mod fixtures;

pub use error::DecodeError;
pub use media::{
    AnimatorOptions, ContainerMetadata, FrameStatus, PixelLayout, PlaybackSnapshot, StopReason,
    WebpAnimator,
};
pub use runtime::{
    DisplaySink, Executor, FrameClock, FrameRecorder, InlineExecutor, IntervalClock, ManualClock,
    SpawnError, WorkerPool,
};
pub use settings::PlayerConfig;
