// Image preprocessing for the Florence-2 vision encoder (DaViT)
//
// Preprocessing steps:
// 1. Convert to RGB8
// 2. Fit to 768x768 (stretch, or uniform scale + black pad at bottom/right)
// 3. Rescale to [0, 1] and normalize with ImageNet statistics
// 4. Lay out as [1, 3, H, W]
//
// The 0..999 location grid spans the fitted canvas, so output coordinates map
// back to the original image through `canvas_size`.

use crate::error::{Florence2Error, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

/// Square input side of the vision encoder
pub const IMAGE_SIZE: u32 = 768;

/// ImageNet mean (RGB order)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet standard deviation (RGB order)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How a non-square image is fitted to the square model input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Scale each axis independently (aspect ratio not preserved)
    #[default]
    Stretch,
    /// Scale uniformly, then pad with black to the bottom and right
    Pad,
}

impl std::fmt::Display for ResizeMode {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stretch => write!(f, "stretch"),
            Self::Pad => write!(f, "pad"),
        }
    }
}

/// Pixel extent covered by the model's 0..999 coordinate grid
///
/// Stretch maps the grid onto the original `width x height`; pad maps it onto
/// the square of the longer side, anchored top-left.
#[inline]
#[must_use = "returns the canvas size in pixels"]
pub fn canvas_size(width: u32, height: u32, mode: ResizeMode) -> (f32, f32) {
    match mode {
        ResizeMode::Stretch => (width as f32, height as f32),
        ResizeMode::Pad => {
            let side = width.max(height) as f32;
            (side, side)
        }
    }
}

/// Image preprocessor for the vision encoder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePreprocessor {
    image_size: u32,
    mode: ResizeMode,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Default for ImagePreprocessor {
    #[inline]
    fn default() -> Self {
        Self::new(ResizeMode::Stretch)
    }
}

impl ImagePreprocessor {
    /// Create a preprocessor with the Florence-2 input size and ImageNet statistics
    #[inline]
    #[must_use = "returns a new preprocessor instance"]
    pub const fn new(mode: ResizeMode) -> Self {
        Self {
            image_size: IMAGE_SIZE,
            mode,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    /// Override the square input side (smaller sizes keep unit tests fast)
    #[inline]
    #[must_use = "returns the preprocessor with the input size configured"]
    pub const fn with_image_size(mut self, image_size: u32) -> Self {
        self.image_size = image_size;
        self
    }

    #[inline]
    #[must_use = "returns the resize mode"]
    pub const fn mode(&self) -> ResizeMode {
        self.mode
    }

    #[inline]
    #[must_use = "returns the square input side"]
    pub const fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Convert `image` into a `[1, 3, size, size]` normalized tensor
    ///
    /// The source image is left untouched.
    pub fn process_image(&self, image: &DynamicImage) -> Result<Array4<f32>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(Florence2Error::PreprocessingError {
                reason: format!("Image has zero extent ({width}x{height})"),
            });
        }

        let fitted = self.fit(&image.to_rgb8());
        log::trace!(
            "Preprocessed {}x{} image to {}x{} ({})",
            width,
            height,
            fitted.width(),
            fitted.height(),
            self.mode
        );
        Ok(self.normalize(&fitted))
    }

    fn fit(&self, rgb: &RgbImage) -> RgbImage {
        let size = self.image_size;
        let (width, height) = rgb.dimensions();
        match self.mode {
            ResizeMode::Stretch => {
                if width == size && height == size {
                    rgb.clone()
                } else {
                    image::imageops::resize(rgb, size, size, FilterType::CatmullRom)
                }
            }
            ResizeMode::Pad => {
                let scale = size as f32 / width.max(height) as f32;
                let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
                let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
                let resized = image::imageops::resize(rgb, new_w, new_h, FilterType::CatmullRom);
                let mut canvas = RgbImage::new(size, size);
                image::imageops::replace(&mut canvas, &resized, 0, 0);
                canvas
            }
        }
    }

    fn normalize(&self, rgb: &RgbImage) -> Array4<f32> {
        let (width, height) = rgb.dimensions();
        let mut array = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (y, row) in rgb.enumerate_rows() {
            for (x, _, pixel) in row {
                for c in 0..3 {
                    // (pixel / 255 - mean) / std
                    let value = f32::from(pixel[c]) / 255.0;
                    array[[0, c, y as usize, x as usize]] = (value - self.mean[c]) / self.std[c];
                }
            }
        }

        array
    }
}
