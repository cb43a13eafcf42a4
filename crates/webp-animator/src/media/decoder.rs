use std::io::Cursor;
use std::sync::Arc;

use image_webp::WebPDecoder;

use super::types::{ContainerMetadata, PixelLayout};
use crate::error::DecodeError;

/// Decode configuration derived from the container metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    pub pixel_layout: PixelLayout,
    /// Bytes in one output frame (`width * height * 4`).
    pub frame_len: usize,
    /// Upper bound on decoder allocations.
    pub memory_limit: usize,
}

impl DecodeOptions {
    /// Set up the decode configuration for an image, enforcing the canvas limit.
    pub fn init(
        meta: &ContainerMetadata,
        pixel_layout: PixelLayout,
        max_canvas_pixels: u64,
    ) -> Result<Self, DecodeError> {
        let pixels = u64::from(meta.canvas_width) * u64::from(meta.canvas_height);
        if pixels == 0 {
            return Err(DecodeError::ConfigInit("canvas has no pixels".into()));
        }
        if pixels > max_canvas_pixels {
            return Err(DecodeError::ConfigInit(format!(
                "canvas {}x{} exceeds the limit of {max_canvas_pixels} pixels",
                meta.canvas_width, meta.canvas_height
            )));
        }
        let frame_len = meta.frame_len().ok_or_else(|| {
            DecodeError::ConfigInit("frame buffer size overflows the address space".into())
        })?;
        // Output frame, native scratch frame and the decoder's own canvas.
        let memory_limit = frame_len.saturating_mul(3).saturating_add(1 << 20);

        Ok(Self {
            pixel_layout,
            frame_len,
            memory_limit,
        })
    }
}

/// An exclusively owned decoder over one bitstream (the "decoder handle").
///
/// `frame()` exposes the most recently decoded canvas. The buffer belongs to
/// the decoder and is overwritten by the next `decode_next` or `reset`.
pub trait AnimDecoder: Send {
    /// Decode the next frame, returning its start timestamp in milliseconds
    /// from the beginning of the current loop.
    fn decode_next(&mut self) -> Result<u64, DecodeError>;

    /// Pixels of the last decoded frame in the configured 32-bit layout.
    fn frame(&self) -> &[u8];

    fn has_more_frames(&self) -> bool;

    /// Rewind to the first frame of the loop.
    fn reset(&mut self) -> Result<(), DecodeError>;
}

/// Factory for decoder handles.
pub trait DecoderBackend: Send + Sync {
    fn create(
        &self,
        bitstream: Arc<[u8]>,
        options: &DecodeOptions,
    ) -> Result<Box<dyn AnimDecoder>, DecodeError>;
}

/// Decoder backend built on the pure-Rust `image-webp` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageWebpBackend;

impl DecoderBackend for ImageWebpBackend {
    fn create(
        &self,
        bitstream: Arc<[u8]>,
        options: &DecodeOptions,
    ) -> Result<Box<dyn AnimDecoder>, DecodeError> {
        Ok(Box::new(ImageWebpDecoder::new(bitstream, options.clone())?))
    }
}

type Inner = WebPDecoder<Cursor<Arc<[u8]>>>;

pub struct ImageWebpDecoder {
    bitstream: Arc<[u8]>,
    inner: Inner,
    options: DecodeOptions,
    animated: bool,
    has_alpha: bool,
    total_frames: u32,
    frames_read: u32,
    next_timestamp: u64,
    /// Native decoder output (RGB or RGBA).
    scratch: Vec<u8>,
    /// Converted 32-bit output handed to the sink.
    frame: Vec<u8>,
}

fn open_inner(bitstream: &Arc<[u8]>, memory_limit: usize) -> Result<Inner, DecodeError> {
    let mut inner = WebPDecoder::new(Cursor::new(Arc::clone(bitstream)))
        .map_err(|e| DecodeError::DecoderCreate(e.to_string()))?;
    inner.set_memory_limit(memory_limit);
    Ok(inner)
}

impl ImageWebpDecoder {
    pub fn new(bitstream: Arc<[u8]>, options: DecodeOptions) -> Result<Self, DecodeError> {
        let inner = open_inner(&bitstream, options.memory_limit)?;

        let (w, h) = inner.dimensions();
        let animated = inner.is_animated();
        let total_frames = if animated { inner.num_frames() } else { 1 };
        let scratch_len = inner
            .output_buffer_size()
            .ok_or_else(|| DecodeError::DecoderCreate("image too large".into()))?;
        let has_alpha = inner.has_alpha();

        log::debug!(
            "Created WebP decoder: {w}x{h}, {total_frames} frame(s), alpha={has_alpha}, layout={:?}",
            options.pixel_layout
        );

        Ok(Self {
            bitstream,
            inner,
            animated,
            has_alpha,
            total_frames,
            frames_read: 0,
            next_timestamp: 0,
            scratch: vec![0; scratch_len],
            frame: vec![0; options.frame_len],
            options,
        })
    }

    fn frame_error(&self, reason: impl Into<String>) -> DecodeError {
        DecodeError::FrameDecode {
            frame: self.frames_read,
            reason: reason.into(),
        }
    }
}

impl AnimDecoder for ImageWebpDecoder {
    fn decode_next(&mut self) -> Result<u64, DecodeError> {
        if !self.has_more_frames() {
            return Err(self.frame_error("no more frames in this loop"));
        }

        let duration = if self.animated {
            match self.inner.read_frame(&mut self.scratch) {
                Ok(duration) => u64::from(duration),
                Err(e) => return Err(self.frame_error(e.to_string())),
            }
        } else {
            if let Err(e) = self.inner.read_image(&mut self.scratch) {
                return Err(self.frame_error(e.to_string()));
            }
            0
        };

        let channels = if self.has_alpha { 4 } else { 3 };
        convert_to_layout(&self.scratch, channels, self.options.pixel_layout, &mut self.frame);

        let timestamp = self.next_timestamp;
        self.next_timestamp += duration;
        self.frames_read += 1;
        Ok(timestamp)
    }

    fn frame(&self) -> &[u8] {
        &self.frame
    }

    fn has_more_frames(&self) -> bool {
        self.frames_read < self.total_frames
    }

    fn reset(&mut self) -> Result<(), DecodeError> {
        // Reopening restarts compositing from a clean canvas.
        let inner = match open_inner(&self.bitstream, self.options.memory_limit) {
            Ok(inner) => inner,
            Err(e) => return Err(self.frame_error(e.to_string())),
        };
        self.inner = inner;
        self.frames_read = 0;
        self.next_timestamp = 0;
        Ok(())
    }
}

/// Convert tightly packed RGB/RGBA pixels into a 32-bit output layout.
pub fn convert_to_layout(src: &[u8], channels: usize, layout: PixelLayout, dst: &mut [u8]) {
    for (s, d) in src.chunks_exact(channels).zip(dst.chunks_exact_mut(4)) {
        let (r, g, b) = (s[0], s[1], s[2]);
        let a = if channels == 4 { s[3] } else { 255 };
        match layout {
            PixelLayout::Rgba => d.copy_from_slice(&[r, g, b, a]),
            PixelLayout::Bgra => d.copy_from_slice(&[b, g, r, a]),
            PixelLayout::BgraPremultiplied => {
                d.copy_from_slice(&[premultiply(b, a), premultiply(g, a), premultiply(r, a), a]);
            }
        }
    }
}

fn premultiply(c: u8, a: u8) -> u8 {
    ((u16::from(c) * u16::from(a) + 127) / 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::media::container;

    fn options_for(data: &[u8], layout: PixelLayout) -> DecodeOptions {
        let meta = container::parse(data).unwrap();
        DecodeOptions::init(&meta, layout, 1 << 24).unwrap()
    }

    #[test]
    fn canvas_limit_is_a_config_error() {
        let data = fixtures::still_webp(8, 8);
        let meta = container::parse(&data).unwrap();
        let err = DecodeOptions::init(&meta, PixelLayout::Rgba, 63).unwrap_err();
        assert!(matches!(err, DecodeError::ConfigInit(_)));
        assert!(DecodeOptions::init(&meta, PixelLayout::Rgba, 64).is_ok());
    }

    #[test]
    fn still_image_decodes_once() {
        let data: Arc<[u8]> = fixtures::still_webp(3, 2).into();
        let options = options_for(&data, PixelLayout::Rgba);
        let mut decoder = ImageWebpBackend.create(Arc::clone(&data), &options).unwrap();

        assert!(decoder.has_more_frames());
        assert_eq!(decoder.decode_next().unwrap(), 0);
        assert_eq!(decoder.frame().len(), 3 * 2 * 4);
        assert_eq!(decoder.frame(), fixtures::frame_pixels(3, 2, 0).as_slice());
        assert!(!decoder.has_more_frames());
        assert!(matches!(
            decoder.decode_next(),
            Err(DecodeError::FrameDecode { frame: 1, .. })
        ));
    }

    #[test]
    fn animated_timestamps_are_frame_start_times() {
        let data: Arc<[u8]> = fixtures::animated_webp(2, 2, &[100, 150, 150, 80], 2).into();
        let options = options_for(&data, PixelLayout::Rgba);
        let mut decoder = ImageWebpDecoder::new(data, options).unwrap();

        let mut stamps = Vec::new();
        while decoder.has_more_frames() {
            stamps.push(decoder.decode_next().unwrap());
        }
        assert_eq!(stamps, vec![0, 100, 250, 400]);
        assert_eq!(decoder.frame(), fixtures::frame_pixels(2, 2, 3).as_slice());

        decoder.reset().unwrap();
        assert!(decoder.has_more_frames());
        assert_eq!(decoder.decode_next().unwrap(), 0);
        assert_eq!(decoder.frame(), fixtures::frame_pixels(2, 2, 0).as_slice());
    }

    #[test]
    fn bgra_layout_swaps_channels() {
        let data: Arc<[u8]> = fixtures::still_webp(1, 1).into();
        let options = options_for(&data, PixelLayout::Bgra);
        let mut decoder = ImageWebpDecoder::new(data, options).unwrap();
        decoder.decode_next().unwrap();
        let rgba = fixtures::frame_pixels(1, 1, 0);
        assert_eq!(decoder.frame(), &[rgba[2], rgba[1], rgba[0], rgba[3]]);
    }

    #[test]
    fn unreadable_bitstream_is_a_create_error() {
        let options = options_for(&fixtures::still_webp(4, 4), PixelLayout::Rgba);
        let junk: Arc<[u8]> = vec![0xAB; 64].into();
        assert!(matches!(
            ImageWebpBackend.create(junk, &options),
            Err(DecodeError::DecoderCreate(_))
        ));
    }

    #[test]
    fn premultiplied_conversion() {
        let src = [200, 100, 50, 128, 10, 20, 30];
        let mut dst = [0u8; 4];
        convert_to_layout(&src[..4], 4, PixelLayout::BgraPremultiplied, &mut dst);
        assert_eq!(dst, [25, 50, 100, 128]);

        let mut rgb_dst = [0u8; 8];
        convert_to_layout(&[1, 2, 3, 4, 5, 6], 3, PixelLayout::Rgba, &mut rgb_dst);
        assert_eq!(rgb_dst, [1, 2, 3, 255, 4, 5, 6, 255]);
    }
}
