//! Border-colour keying: the zero-dependency last resort.

use cutout_kernel::{BackendType, PipelineError, PipelineResult};
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};

use super::BackendInfo;

/// Keys out pixels close to the colour estimated from the image border.
///
/// Pixels within `tolerance` (Euclidean RGB distance) of the border colour
/// become transparent; the next `softness` units ramp to fully opaque.
#[derive(Debug, Clone)]
pub struct BaselineBackend {
    tolerance: f32,
    softness: f32,
}

impl Default for BaselineBackend {
    fn default() -> Self {
        Self {
            tolerance: 40.0,
            softness: 30.0,
        }
    }
}

impl BaselineBackend {
    pub fn new(tolerance: f32, softness: f32) -> Self {
        Self {
            tolerance: tolerance.max(0.0),
            softness: softness.max(f32::EPSILON),
        }
    }

    pub fn info(&self) -> BackendInfo {
        BackendInfo {
            backend: BackendType::Baseline,
            model_name: "border-key".to_string(),
            description: "Classic border-colour keying, always available".to_string(),
            device: Some("cpu".to_string()),
            endpoint: None,
        }
    }

    pub fn remove_background(&self, image: &DynamicImage) -> PipelineResult<DynamicImage> {
        let rgb = image.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(PipelineError::execution(
                BackendType::Baseline,
                "image has no pixels",
            ));
        }

        let background = border_mean(&rgb);
        let mut out = RgbaImage::new(rgb.width(), rgb.height());
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let alpha = self.alpha_for(distance(pixel, &background));
            out.put_pixel(x, y, Rgba([pixel[0], pixel[1], pixel[2], alpha]));
        }
        Ok(DynamicImage::ImageRgba8(out))
    }

    fn alpha_for(&self, distance: f32) -> u8 {
        if distance <= self.tolerance {
            0
        } else if distance >= self.tolerance + self.softness {
            255
        } else {
            ((distance - self.tolerance) / self.softness * 255.0).round() as u8
        }
    }
}

/// Mean colour of the outermost ring of pixels.
fn border_mean(image: &RgbImage) -> [f32; 3] {
    let (width, height) = image.dimensions();
    let mut sum = [0f64; 3];
    let mut count = 0u64;
    let mut add = |pixel: &Rgb<u8>| {
        for (acc, channel) in sum.iter_mut().zip(pixel.0) {
            *acc += f64::from(channel);
        }
        count += 1;
    };

    for x in 0..width {
        add(image.get_pixel(x, 0));
        if height > 1 {
            add(image.get_pixel(x, height - 1));
        }
    }
    for y in 1..height.saturating_sub(1) {
        add(image.get_pixel(0, y));
        if width > 1 {
            add(image.get_pixel(width - 1, y));
        }
    }

    let n = count.max(1) as f64;
    [
        (sum[0] / n) as f32,
        (sum[1] / n) as f32,
        (sum[2] / n) as f32,
    ]
}

fn distance(pixel: &Rgb<u8>, reference: &[f32; 3]) -> f32 {
    pixel
        .0
        .iter()
        .zip(reference)
        .map(|(&c, &r)| {
            let d = f32::from(c) - r;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}
