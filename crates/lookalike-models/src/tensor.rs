//! RGB image to NCHW float tensor conversion.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

/// Scale and padding applied when fitting an image into a square input.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a point in letterboxed input space back to source pixels.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Fit `image` into a `size`×`size` tensor preserving aspect ratio. Padding
/// pixels take the value `fill` before normalisation.
pub(crate) fn letterbox_tensor(
    image: &RgbImage,
    size: usize,
    fill: f32,
    normalize: impl Fn(usize, f32) -> f32,
) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as usize).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, size);
    let pad_x = (size - new_w) as f32 / 2.0;
    let pad_y = (size - new_h) as f32 / 2.0;

    let resized = imageops::resize(image, new_w as u32, new_h as u32, FilterType::Triangle);

    let x0 = pad_x.floor() as usize;
    let y0 = pad_y.floor() as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for c in 0..3 {
        let padded = normalize(c, fill);
        tensor.slice_mut(ndarray::s![0, c, .., ..]).fill(padded);
    }
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y0 + y as usize, x0 + x as usize]] = normalize(c, pixel[c] as f32);
        }
    }

    (tensor, Letterbox { scale, pad_x, pad_y })
}

/// Stretch `image` to `size`×`size` and normalise each channel.
pub(crate) fn resized_tensor(
    image: &RgbImage,
    size: usize,
    normalize: impl Fn(usize, f32) -> f32,
) -> Array4<f32> {
    let resized = imageops::resize(image, size as u32, size as u32, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = normalize(c, pixel[c] as f32);
        }
    }
    tensor
}
