//! Test support shared by unit and integration tests.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

pub mod mocks;

pub use mocks::{EncodeCall, MockBehavior, MockEncoder, parse_playlist};

/// A small valid JPEG whose pixels depend on `seed`.
pub fn jpeg_fixture(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x as u8).wrapping_mul(7).wrapping_add(seed),
            (y as u8).wrapping_mul(13),
            seed.wrapping_mul(31),
        ])
    });

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, 85)
        .encode_image(&img)
        .expect("encode jpeg fixture");
    out.into_inner()
}
