//! Test fixtures: real WebP bitstreams built with the `image-webp` encoder.
//!
//! Animated files are assembled by hand (VP8X + ANIM + ANMF) around
//! lossless frame bitstreams, since the encoder only writes still images.

use image_webp::{ColorType, WebPEncoder};

/// Solid-colour RGBA frame whose colour depends on `index`.
pub fn frame_pixels(width: u32, height: u32, index: u32) -> Vec<u8> {
    let colour = [
        (index * 40 % 256) as u8,
        (255 - index * 40 % 256) as u8,
        (index * 13 % 256) as u8,
        255,
    ];
    colour.repeat((width * height) as usize)
}

fn encode_rgba(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    WebPEncoder::new(&mut out)
        .encode(pixels, width, height, ColorType::Rgba8)
        .expect("encode fixture frame");
    out
}

/// A simple (non-extended) lossless still image.
pub fn still_webp(width: u32, height: u32) -> Vec<u8> {
    encode_rgba(&frame_pixels(width, height, 0), width, height)
}

/// Extract the VP8L payload from an encoded still image.
fn vp8l_payload(encoded: &[u8]) -> Vec<u8> {
    let mut pos = 12;
    while pos + 8 <= encoded.len() {
        let fourcc = &encoded[pos..pos + 4];
        let size = u32::from_le_bytes(encoded[pos + 4..pos + 8].try_into().unwrap()) as usize;
        if fourcc == b"VP8L" {
            return encoded[pos + 8..pos + 8 + size].to_vec();
        }
        pos += 8 + size + (size & 1);
    }
    panic!("encoder output has no VP8L chunk");
}

fn push_u24(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes()[..3]);
}

fn push_chunk(out: &mut Vec<u8>, fourcc: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(fourcc);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
}

/// Animated lossless WebP with one full-canvas frame per entry in `durations_ms`.
pub fn animated_webp(width: u32, height: u32, durations_ms: &[u32], loop_count: u16) -> Vec<u8> {
    let mut body = Vec::new();

    let mut vp8x = vec![0b0001_0010, 0, 0, 0];
    push_u24(&mut vp8x, width - 1);
    push_u24(&mut vp8x, height - 1);
    push_chunk(&mut body, b"VP8X", &vp8x);

    let mut anim = vec![0, 0, 0, 0];
    anim.extend_from_slice(&loop_count.to_le_bytes());
    push_chunk(&mut body, b"ANIM", &anim);

    for (i, &duration) in durations_ms.iter().enumerate() {
        let encoded = encode_rgba(&frame_pixels(width, height, i as u32), width, height);
        let vp8l = vp8l_payload(&encoded);

        let mut anmf = Vec::new();
        push_u24(&mut anmf, 0);
        push_u24(&mut anmf, 0);
        push_u24(&mut anmf, width - 1);
        push_u24(&mut anmf, height - 1);
        push_u24(&mut anmf, duration);
        // No blending, no disposal: every frame overwrites the canvas.
        anmf.push(0b0000_0010);
        push_chunk(&mut anmf, b"VP8L", &vp8l);
        push_chunk(&mut body, b"ANMF", &anmf);
    }

    let mut out = Vec::with_capacity(body.len() + 12);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
    out.extend_from_slice(b"WEBP");
    out.extend_from_slice(&body);
    out
}
