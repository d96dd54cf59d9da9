//! Document binarization and word region detection
//!
//! Converts a photographed page into a clean black-on-white binary image and
//! finds candidate word regions by growing ink strokes into word-sized blobs.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::distance_transform::Norm;
use imageproc::filter::box_filter;
use imageproc::morphology::dilate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::error::{RecognitionError, Result};
use super::layout::BoundingBox;

/// Binarization and detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    /// Non-local-means filter strength (0 disables denoising)
    pub denoise_strength: f32,
    /// Radius of the patch compared by the denoiser
    pub denoise_patch_radius: u32,
    /// Radius of the window searched for similar patches
    pub denoise_search_radius: u32,
    /// Side of the adaptive threshold neighborhood (odd, >= 3)
    pub block_size: u32,
    /// Constant subtracted from the neighborhood mean
    pub offset: i16,
    /// Regions with area at or below this are treated as noise
    pub min_region_area: u64,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            denoise_strength: 10.0,
            denoise_patch_radius: 1,
            denoise_search_radius: 3,
            block_size: 15,
            offset: 30,
            min_region_area: 750,
        }
    }
}

impl PreprocessOptions {
    /// Reject parameter combinations the filters cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.block_size < 3 || self.block_size % 2 == 0 {
            return Err(RecognitionError::InvalidConfiguration(format!(
                "adaptive block size must be odd and >= 3, got {}",
                self.block_size
            )));
        }
        let h = self.denoise_strength;
        if !h.is_finite() || h < 0.0 {
            return Err(RecognitionError::InvalidConfiguration(format!(
                "denoise strength must be a non-negative number, got {}",
                h
            )));
        }
        // The filter divides by h^2, which must stay a usable positive number
        let h2 = h * h;
        if h > 0.0 && !(h2 > 0.0 && h2.is_finite()) {
            return Err(RecognitionError::InvalidConfiguration(format!(
                "denoise strength {} is out of range (use 0 to disable denoising)",
                h
            )));
        }
        Ok(())
    }
}

/// Load a document image from disk
pub fn load_document(path: &Path) -> Result<DynamicImage> {
    let img = image::open(path)
        .map_err(|e| RecognitionError::InvalidImage(format!("{}: {}", path.display(), e)))?;
    ensure_not_empty(&img)?;
    Ok(img)
}

/// Decode a document image from encoded bytes (PNG, JPEG, ...)
pub fn load_document_from_bytes(data: &[u8]) -> Result<DynamicImage> {
    let img = image::load_from_memory(data)?;
    ensure_not_empty(&img)?;
    Ok(img)
}

fn ensure_not_empty(img: &DynamicImage) -> Result<()> {
    if img.width() == 0 || img.height() == 0 {
        return Err(RecognitionError::InvalidImage(format!(
            "image has no pixels ({}x{})",
            img.width(),
            img.height()
        )));
    }
    Ok(())
}

/// Grayscale, denoise and binarize a document
///
/// Output pixels are 0 (ink) or 255 (paper).
pub fn preprocess(image: &DynamicImage, options: &PreprocessOptions) -> Result<GrayImage> {
    ensure_not_empty(image)?;
    options.validate()?;

    let gray = image.to_luma8();
    let denoised = if options.denoise_strength > 0.0 {
        denoise_nl_means(
            &gray,
            options.denoise_strength,
            options.denoise_patch_radius,
            options.denoise_search_radius,
        )
    } else {
        gray
    };
    let binary = adaptive_threshold_mean(&denoised, options.block_size, options.offset);

    debug!(
        "Preprocessed {}x{} document (denoise h={}, block={}, offset={})",
        binary.width(),
        binary.height(),
        options.denoise_strength,
        options.block_size,
        options.offset
    );

    Ok(binary)
}

/// Non-local-means denoising on a grayscale image
///
/// Each pixel becomes a weighted mean of the pixels in its search window,
/// weighted by `exp(-d / h^2)` where `d` is the mean squared difference of
/// the surrounding patches. Borders are handled by clamping coordinates.
pub fn denoise_nl_means(
    gray: &GrayImage,
    h: f32,
    patch_radius: u32,
    search_radius: u32,
) -> GrayImage {
    let (width, height) = gray.dimensions();
    let raw = gray.as_raw();
    let w = width as i64;
    let hgt = height as i64;
    let pr = patch_radius as i64;
    let sr = search_radius as i64;
    let h2 = h * h;
    if !(h2 > 0.0 && h2.is_finite()) {
        return gray.clone();
    }
    let patch_len = ((2 * pr + 1) * (2 * pr + 1)) as f32;

    let at = |x: i64, y: i64| -> f32 {
        let cx = x.clamp(0, w - 1);
        let cy = y.clamp(0, hgt - 1);
        raw[(cy * w + cx) as usize] as f32
    };

    GrayImage::from_fn(width, height, |px, py| {
        let (px, py) = (px as i64, py as i64);
        let mut weight_sum = 0.0f32;
        let mut value_sum = 0.0f32;

        for qy in (py - sr)..=(py + sr) {
            for qx in (px - sr)..=(px + sr) {
                if qx < 0 || qy < 0 || qx >= w || qy >= hgt {
                    continue;
                }

                let mut dist = 0.0f32;
                for dy in -pr..=pr {
                    for dx in -pr..=pr {
                        let d = at(px + dx, py + dy) - at(qx + dx, qy + dy);
                        dist += d * d;
                    }
                }
                let weight = (-(dist / patch_len) / h2).exp();

                weight_sum += weight;
                value_sum += weight * at(qx, qy);
            }
        }

        // The pixel itself is always in its window, so weight_sum >= 1
        Luma([(value_sum / weight_sum).round().clamp(0.0, 255.0) as u8])
    })
}

/// Mean-based adaptive threshold
///
/// A pixel becomes paper (255) when it is brighter than its `block_size`
/// neighborhood mean minus `offset`, and ink (0) otherwise.
pub fn adaptive_threshold_mean(gray: &GrayImage, block_size: u32, offset: i16) -> GrayImage {
    let radius = block_size / 2;
    let means = box_filter(gray, radius, radius);

    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let src = gray.get_pixel(x, y)[0] as i16;
        let mean = means.get_pixel(x, y)[0] as i16;
        if src > mean - offset {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

/// Find candidate word boxes in a binary document
///
/// Ink is grown with `iterations` passes of a 3x3 square so neighbouring
/// strokes fuse into word blobs, then every contour's bounding rectangle is
/// kept unless it is noise-sized or spans the full page.
pub fn detect_regions(
    binary: &GrayImage,
    iterations: u32,
    min_area: u64,
) -> Result<Vec<BoundingBox>> {
    let (width, height) = binary.dimensions();
    if width == 0 || height == 0 {
        return Err(RecognitionError::InvalidImage("binary image has no pixels".into()));
    }

    // Ink becomes foreground for the morphology pass
    let mut grown = binary.clone();
    image::imageops::invert(&mut grown);
    // n passes of a 3x3 square equal one pass of a (2n+1) square
    let mut grown = dilate(&grown, Norm::LInf, iterations.min(u8::MAX as u32) as u8);
    image::imageops::invert(&mut grown);

    let contours = find_contours::<u32>(&grown);
    let total = contours.len();

    let boxes: Vec<BoundingBox> = contours
        .iter()
        .filter_map(|contour| contour_bounds(&contour.points))
        .filter(|b| is_candidate_word(b, min_area, width, height))
        .collect();

    debug!(
        "Detected {} word regions from {} contours ({} dilation passes)",
        boxes.len(),
        total,
        iterations
    );

    Ok(boxes)
}

/// Inclusive pixel bounds of a point set, as a box
fn contour_bounds(points: &[imageproc::point::Point<u32>]) -> Option<BoundingBox> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(BoundingBox::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Noise and page-border filter for detected rectangles
pub(crate) fn is_candidate_word(b: &BoundingBox, min_area: u64, width: u32, height: u32) -> bool {
    b.area() > min_area && b.width < width && b.height < height
}
