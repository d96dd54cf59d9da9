//! Word image extraction
//!
//! Crops one word box out of the binarized page and rescales it to the
//! sequence model's fixed input size as normalized grayscale samples.

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array2;

use super::error::{RecognitionError, Result};
use super::layout::BoundingBox;

/// Normalized single-channel model input, `height x width`, values in `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct WordImage {
    pixels: Array2<f32>,
}

impl WordImage {
    /// Normalize an 8-bit grayscale image
    pub fn from_gray(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        let pixels = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            gray.get_pixel(x as u32, y as u32)[0] as f32 / 255.0
        });
        Self { pixels }
    }

    pub fn width(&self) -> usize {
        self.pixels.ncols()
    }

    pub fn height(&self) -> usize {
        self.pixels.nrows()
    }

    pub fn pixels(&self) -> &Array2<f32> {
        &self.pixels
    }

    /// Row-major samples, top row first
    pub fn to_flat(&self) -> Vec<f32> {
        self.pixels.iter().copied().collect()
    }
}

/// Crop exactly the pixels covered by `bounds`
pub fn extract_word(image: &GrayImage, bounds: &BoundingBox) -> Result<GrayImage> {
    let (width, height) = image.dimensions();
    if bounds.width == 0
        || bounds.height == 0
        || bounds.right() > width
        || bounds.bottom() > height
    {
        return Err(RecognitionError::InvalidImage(format!(
            "word box {:?} does not fit inside {}x{} page",
            bounds, width, height
        )));
    }

    Ok(imageops::crop_imm(image, bounds.x, bounds.y, bounds.width, bounds.height).to_image())
}

/// Resize a word crop to the model input size with bilinear filtering
pub fn rescale(word: &GrayImage, target_width: u32, target_height: u32) -> GrayImage {
    if word.dimensions() == (target_width, target_height) {
        return word.clone();
    }
    imageops::resize(word, target_width, target_height, FilterType::Triangle)
}

/// Crop, rescale and normalize one word for inference
pub fn prepare_word(
    page: &GrayImage,
    bounds: &BoundingBox,
    target_width: u32,
    target_height: u32,
) -> Result<WordImage> {
    let crop = extract_word(page, bounds)?;
    Ok(WordImage::from_gray(&rescale(&crop, target_width, target_height)))
}
