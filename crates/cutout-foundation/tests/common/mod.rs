//! Common test utilities shared across the `cutout-foundation` integration tests.
//!
//! This module is **not** a standalone test binary. It is declared with
//! `mod common;` inside each integration test file that needs it.

pub mod doubles;

use image::{DynamicImage, Rgb, RgbImage};

/// A light canvas with a dark square in the middle.
pub fn sample_image(width: u32, height: u32) -> DynamicImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb([245, 245, 245]));
    for y in height / 4..(3 * height / 4).max(height / 4 + 1) {
        for x in width / 4..(3 * width / 4).max(width / 4 + 1) {
            if x < width && y < height {
                img.put_pixel(x, y, Rgb([20, 40, 160]));
            }
        }
    }
    DynamicImage::ImageRgb8(img)
}

/// An image with no pixels. Every backend rejects it.
pub fn empty_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::new(0, 0))
}
