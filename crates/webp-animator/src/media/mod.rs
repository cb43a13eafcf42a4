//! WebP container parsing, frame decoding and the playback engine.

pub mod animator;
pub mod container;
pub mod decoder;
pub mod types;

pub use animator::{AnimatorOptions, LoadCallback, WebpAnimator};
pub use decoder::{AnimDecoder, DecodeOptions, DecoderBackend, ImageWebpBackend};
pub use types::{ContainerMetadata, FrameStatus, PixelLayout, PlaybackSnapshot, StopReason};
