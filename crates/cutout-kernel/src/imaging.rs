//! Colour-mode normalization at the pipeline boundary.
//!
//! Backends receive 3-channel input and the pipeline hands back 4-channel
//! output; everything else about pixels belongs to the image layer.

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, GenericImageView, GrayImage, RgbaImage};
use serde::Serialize;

/// Size and mode facts recorded for a successful outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageMetadata {
    pub input_size: (u32, u32),
    pub output_size: (u32, u32),
    pub output_mode: String,
}

impl ImageMetadata {
    pub fn describe(input: &DynamicImage, output: &DynamicImage) -> Self {
        Self {
            input_size: input.dimensions(),
            output_size: output.dimensions(),
            output_mode: color_mode(output).to_string(),
        }
    }
}

/// Short mode name in the usual `L`/`RGB`/`RGBA` vocabulary.
pub fn color_mode(image: &DynamicImage) -> Cow<'static, str> {
    match image.color() {
        ColorType::L8 | ColorType::L16 => Cow::Borrowed("L"),
        ColorType::La8 | ColorType::La16 => Cow::Borrowed("LA"),
        ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => Cow::Borrowed("RGB"),
        ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => Cow::Borrowed("RGBA"),
        other => Cow::Owned(format!("{other:?}")),
    }
}

/// Ensure 3-channel 8-bit input before dispatch.
pub fn normalize_input(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) => image,
        other => {
            tracing::debug!(mode = %color_mode(&other), "converting input to RGB");
            DynamicImage::ImageRgb8(other.to_rgb8())
        }
    }
}

/// Ensure 4-channel 8-bit output with a transparency channel.
pub fn coerce_output(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgba8(_) => image,
        other => {
            tracing::debug!(mode = %color_mode(&other), "converting output to RGBA");
            DynamicImage::ImageRgba8(other.to_rgba8())
        }
    }
}

/// Use `mask` as the alpha channel of `image`, resizing the mask when the
/// model worked at a different resolution.
pub fn apply_alpha_mask(image: &DynamicImage, mask: &GrayImage) -> RgbaImage {
    let (width, height) = image.dimensions();
    let mask = if mask.dimensions() == (width, height) {
        Cow::Borrowed(mask)
    } else {
        Cow::Owned(imageops::resize(mask, width, height, FilterType::Triangle))
    };

    let mut rgba = image.to_rgba8();
    for (pixel, alpha) in rgba.pixels_mut().zip(mask.pixels()) {
        pixel.0[3] = alpha.0[0];
    }
    rgba
}
