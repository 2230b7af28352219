//! Frame preprocessing for zero-shot detection models
//!
//! OWL-style detectors expect a square input. The frame is padded on the
//! bottom and right to a square of side `max(width, height)`, resized to the
//! model size and normalised into an NCHW tensor. The model then predicts
//! boxes relative to the padded square, which [`PaddedGeometry`] maps back
//! to boxes relative to the frame.

use crate::{
    error::{Result, SearchError},
    models::PreprocessingConfig,
};
use image::{imageops, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;

/// Relationship between a frame and its padded square
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddedGeometry {
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Side of the padded square
    pub side: u32,
}

impl PaddedGeometry {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            side: width.max(height),
        }
    }

    /// Convert `[cx, cy, w, h]` relative to the padded square into
    /// `[x1, y1, x2, y2]` relative to the frame
    #[must_use]
    pub fn to_frame_normalized(&self, center_box: [f32; 4]) -> [f32; 4] {
        let [cx, cy, w, h] = center_box;
        let side = self.side as f32;
        let x_scale = side / self.width.max(1) as f32;
        let y_scale = side / self.height.max(1) as f32;
        [
            (cx - w / 2.0) * x_scale,
            (cy - h / 2.0) * y_scale,
            (cx + w / 2.0) * x_scale,
            (cy + h / 2.0) * y_scale,
        ]
    }
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Pad, resize and normalise a frame into a `[1, 3, H, W]` tensor
    ///
    /// # Errors
    /// - Empty frame
    /// - Zero model input size
    pub fn preprocess(
        image: &RgbImage,
        config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, PaddedGeometry)> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(SearchError::processing("Cannot preprocess an empty frame"));
        }
        let [target_height, target_width] = config.target_size;
        if target_height == 0 || target_width == 0 {
            return Err(SearchError::processing("Model input size must be non-zero"));
        }

        let geometry = PaddedGeometry::new(width, height);
        let canvas = Self::pad_to_square(image, geometry.side, config.pad_value);
        let resized = imageops::resize(
            &canvas,
            target_width,
            target_height,
            imageops::FilterType::Triangle,
        );

        Ok((Self::canvas_to_tensor(&resized, config), geometry))
    }

    /// Copy the frame into the top-left corner of a grey square
    fn pad_to_square(image: &RgbImage, side: u32, pad_value: f32) -> RgbImage {
        if image.width() == side && image.height() == side {
            return image.clone();
        }
        let grey = (pad_value.clamp(0.0, 1.0) * 255.0).round() as u8;
        let mut canvas = ImageBuffer::from_pixel(side, side, Rgb([grey, grey, grey]));
        imageops::replace(&mut canvas, image, 0, 0);
        canvas
    }

    /// Convert canvas to normalized tensor
    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        let mean = config.normalization_mean;
        let std = config.normalization_std;

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match canvas size
        for (x, y, pixel) in canvas.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                tensor[[0, channel, y, x]] =
                    (f32::from(pixel[channel]) / 255.0 - mean[channel]) / std[channel];
            }
        }

        tensor
    }
}
