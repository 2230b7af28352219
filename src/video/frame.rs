//! Decoded video frame and decode statistics

use image::{DynamicImage, RgbImage};

/// A single decoded frame and its position in the video
///
/// Frames are produced by a [`VideoHandle`](super::VideoHandle) and move by
/// value through keyframe selection into detection. The pixel buffer is
/// 8-bit RGB, `height x width x 3`.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame pixels
    pub image: RgbImage,
    /// Zero-based frame index, unique within one traversal
    pub index: u64,
    /// Position in seconds, always `index / fps`
    pub timestamp: f64,
}

impl Frame {
    /// Create a frame, deriving the timestamp from the index and frame rate
    #[must_use]
    pub fn new(image: RgbImage, index: u64, fps: f64) -> Self {
        Self {
            image,
            index,
            timestamp: frame_timestamp(index, fps),
        }
    }

    /// Frame width in pixels
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Frame height in pixels
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get frame dimensions as `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Convert frame to `DynamicImage` for encoding
    #[must_use]
    pub fn to_dynamic_image(&self) -> DynamicImage {
        DynamicImage::ImageRgb8(self.image.clone())
    }
}

/// Timestamp in seconds of `index` at `fps`
#[must_use]
pub fn frame_timestamp(index: u64, fps: f64) -> f64 {
    index as f64 / fps
}

/// Counters collected while traversing a video
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Frames successfully decoded
    pub frames_decoded: u64,
    /// Whether the stream ended on a decode error
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_frame_creation() {
        let image = RgbImage::from_pixel(100, 50, Rgb([255, 0, 0]));
        let frame = Frame::new(image, 45, 30.0);

        assert_eq!(frame.index, 45);
        assert!((frame.timestamp - 1.5).abs() < 1e-9);
        assert_eq!(frame.dimensions(), (100, 50));
        assert_eq!(frame.width(), 100);
        assert_eq!(frame.height(), 50);
    }

    #[test]
    fn test_timestamp_law_across_rates() {
        for fps in [1.0, 23.976, 25.0, 29.97, 30.0, 59.94, 120.0] {
            for index in [0_u64, 1, 17, 1800, 123_456] {
                let ts = frame_timestamp(index, fps);
                assert!((ts * fps - index as f64).abs() < 1e-6, "fps={fps} index={index}");
            }
        }
    }

    #[test]
    fn test_dynamic_image_conversion() {
        let frame = Frame::new(RgbImage::new(8, 4), 0, 25.0);
        let dynamic = frame.to_dynamic_image();
        assert_eq!(dynamic.width(), 8);
        assert_eq!(dynamic.height(), 4);
    }
}
