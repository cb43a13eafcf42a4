//! WebP container metadata.
//!
//! A short-lived `image-webp` decoder reads the RIFF headers and is dropped
//! again; no pixel data is decoded here.

use std::io::Cursor;

use image_webp::{LoopCount, WebPDecoder};

use super::types::ContainerMetadata;
use crate::error::DecodeError;

fn malformed(msg: impl Into<String>) -> DecodeError {
    DecodeError::ContainerParse(msg.into())
}

/// Parse container metadata from a complete WebP bitstream.
pub fn parse(data: &[u8]) -> Result<ContainerMetadata, DecodeError> {
    if data.is_empty() {
        return Err(malformed("empty bitstream"));
    }
    let demux = WebPDecoder::new(Cursor::new(data)).map_err(|e| malformed(e.to_string()))?;

    let (canvas_width, canvas_height) = demux.dimensions();
    let animated = demux.is_animated();
    let frame_count = if animated { demux.num_frames() } else { 1 };
    if frame_count == 0 {
        return Err(malformed("animation contains no frames"));
    }
    // Still images play exactly once.
    let loop_count = if animated {
        match demux.loop_count() {
            LoopCount::Forever => 0,
            LoopCount::Times(n) => u16::from(n),
        }
    } else {
        1
    };

    let meta = ContainerMetadata {
        canvas_width,
        canvas_height,
        frame_count,
        loop_count,
        has_alpha: demux.has_alpha(),
        background_color: if animated {
            demux.background_color_hint()
        } else {
            None
        },
    };
    log::debug!(
        "Parsed WebP container: {}x{}, {} frame(s), loop count {}",
        meta.canvas_width,
        meta.canvas_height,
        meta.frame_count,
        meta.loop_count
    );
    Ok(meta)
}
