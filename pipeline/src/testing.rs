//! Synthetic frames for tests.

use frame_distill_common::frame::SampledFrame;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

use crate::decoder::DecodedFrame;

/// A black raster whose first `lit` pixels (row-major) are white.
///
/// Two such rasters of the same size differ in exactly `|lit_a - lit_b|`
/// pixels, which makes scores easy to reason about.
pub fn lit_raster(width: u32, height: u32, lit: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        if y * width + x < lit {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

pub fn frame_png(width: u32, height: u32, lit: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    lit_raster(width, height, lit)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Opaque pseudo-random pixels. Noise barely compresses, so these frames
/// are far slower to decode than a flat raster of the same size.
pub fn noise_png(width: u32, height: u32, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9) | 1;
    let raster = RgbaImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        Rgba([r, g, b, 255])
    });
    let mut buf = Cursor::new(Vec::new());
    raster.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

pub fn decoded(index: u32, lit: u32) -> DecodedFrame {
    DecodedFrame::new(index, lit_raster(10, 10, lit))
}

/// A 10x10 sampled frame with `lit` white pixels.
pub fn sampled(index: u32, lit: u32) -> SampledFrame {
    SampledFrame::new(index, frame_png(10, 10, lit))
}

pub fn corrupt(index: u32) -> SampledFrame {
    SampledFrame::new(index, b"\x89PNG\r\n\x1a\nbroken".to_vec())
}
