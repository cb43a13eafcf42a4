use thiserror::Error;

use crate::runtime::SpawnError;

/// Errors reported by the animation engine.
///
/// Initialization-phase variants (`ContainerParse`, `ConfigInit`,
/// `DecoderCreate`, `Io`) are delivered through the load-completion signal.
/// `FrameDecode` and `Executor` are terminal for a running animation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The bitstream is empty, truncated, or not a WebP container.
    #[error("Malformed WebP container: {0}")]
    ContainerParse(String),

    /// The decode configuration could not be set up for this image.
    #[error("Decoder configuration failed: {0}")]
    ConfigInit(String),

    /// The decoder resource could not be created from the bitstream.
    #[error("Failed to create decoder: {0}")]
    DecoderCreate(String),

    /// A frame failed to decode after the decoder was created.
    #[error("Frame {frame} failed to decode: {reason}")]
    FrameDecode {
        /// Zero-based index of the frame within the current loop.
        frame: u32,
        /// Decoder-specific failure description.
        reason: String,
    },

    /// Reading the bitstream source failed.
    #[error("Failed to read bitstream: {0}")]
    Io(#[from] std::io::Error),

    /// A decode job could not be handed to the executor.
    #[error(transparent)]
    Executor(#[from] SpawnError),
}
