//! Histogram-change sampling
//!
//! Each frame is reduced to a 256-bin grayscale histogram and compared with
//! the histogram of the last *selected* frame using Pearson correlation. A
//! frame is selected when the correlation drops below the threshold, at which
//! point it becomes the new reference. The first frame is always selected.
//!
//! Memory is one reference histogram; cost is one pass over the pixels.

use crate::keyframe::KeyframeSelector;
use crate::video::Frame;
use image::RgbImage;

/// Number of grayscale bins
pub const HISTOGRAM_BINS: usize = 256;

/// L2-normalised 256-bin grayscale histogram
#[derive(Debug, Clone, PartialEq)]
pub struct GrayHistogram {
    bins: [f32; HISTOGRAM_BINS],
}

impl GrayHistogram {
    /// Compute the histogram of an RGB image using BT.601 luma
    #[must_use]
    pub fn from_image(image: &RgbImage) -> Self {
        let mut counts = [0u32; HISTOGRAM_BINS];
        for pixel in image.pixels() {
            let [r, g, b] = pixel.0;
            counts[usize::from(luma(r, g, b))] += 1;
        }

        let norm = counts
            .iter()
            .map(|&c| f64::from(c) * f64::from(c))
            .sum::<f64>()
            .sqrt();

        let mut bins = [0f32; HISTOGRAM_BINS];
        if norm > 0.0 {
            for (bin, &count) in bins.iter_mut().zip(counts.iter()) {
                *bin = (f64::from(count) / norm) as f32;
            }
        }
        Self { bins }
    }

    /// Normalised bin values
    #[must_use]
    pub fn bins(&self) -> &[f32; HISTOGRAM_BINS] {
        &self.bins
    }

    /// Pearson correlation with `other`, in [-1, 1]
    ///
    /// When either histogram has zero variance (a flat or empty histogram)
    /// the result is 1.0, the same convention as OpenCV's `HISTCMP_CORREL`.
    #[must_use]
    pub fn correlation(&self, other: &Self) -> f64 {
        let n = HISTOGRAM_BINS as f64;
        let mean_a = self.bins.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
        let mean_b = other.bins.iter().map(|&v| f64::from(v)).sum::<f64>() / n;

        let mut covariance = 0.0;
        let mut var_a = 0.0;
        let mut var_b = 0.0;
        for (&a, &b) in self.bins.iter().zip(other.bins.iter()) {
            let da = f64::from(a) - mean_a;
            let db = f64::from(b) - mean_b;
            covariance += da * db;
            var_a += da * da;
            var_b += db * db;
        }

        let denominator = (var_a * var_b).sqrt();
        if denominator <= f64::EPSILON {
            return 1.0;
        }
        (covariance / denominator).clamp(-1.0, 1.0)
    }
}

/// BT.601 luma in 14-bit fixed point, rounded
fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = (u32::from(r) * 4899 + u32::from(g) * 9617 + u32::from(b) * 1868 + 8192) >> 14;
    y.min(255) as u8
}

/// Selects frames that differ from the last selected one
#[derive(Debug, Clone)]
pub struct HistogramChangeSelector {
    threshold: f64,
    reference: Option<GrayHistogram>,
    selected: u64,
}

impl HistogramChangeSelector {
    /// Create a selector; frames whose correlation with the reference falls
    /// below `threshold` are selected
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            reference: None,
            selected: 0,
        }
    }

    /// Correlation threshold
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Frames selected since creation or the last reset
    #[must_use]
    pub fn selected_count(&self) -> u64 {
        self.selected
    }
}

impl KeyframeSelector for HistogramChangeSelector {
    fn should_select(&mut self, frame: &Frame) -> bool {
        let histogram = GrayHistogram::from_image(&frame.image);

        let selected = match &self.reference {
            None => true,
            Some(reference) => {
                let correlation = reference.correlation(&histogram);
                let changed = correlation < self.threshold;
                if changed {
                    tracing::debug!(
                        frame_index = frame.index,
                        correlation = format!("{correlation:.3}"),
                        threshold = self.threshold,
                        "Scene change detected"
                    );
                }
                changed
            },
        };

        if selected {
            self.reference = Some(histogram);
            self.selected += 1;
        }
        selected
    }

    fn name(&self) -> &'static str {
        "histogram-change"
    }

    fn reset(&mut self) {
        self.reference = None;
        self.selected = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(value: u8) -> RgbImage {
        RgbImage::from_pixel(16, 16, Rgb([value, value, value]))
    }

    fn half_split(left: u8, right: u8) -> RgbImage {
        RgbImage::from_fn(16, 16, |x, _| {
            let v = if x < 8 { left } else { right };
            Rgb([v, v, v])
        })
    }

    /// One pixel per gray level, so every bin holds the same value
    fn gradient() -> RgbImage {
        RgbImage::from_fn(256, 1, |x, _| {
            let v = x as u8;
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_flat_histogram_correlates_fully() {
        let flat = GrayHistogram::from_image(&gradient());
        let single = GrayHistogram::from_image(&solid(40));
        assert!((flat.correlation(&single) - 1.0).abs() < f64::EPSILON);
        assert!((single.correlation(&flat) - 1.0).abs() < f64::EPSILON);

        let mut selector = HistogramChangeSelector::new(0.6);
        assert!(selector.should_select(&Frame::new(solid(40), 0, 30.0)));
        assert!(!selector.should_select(&Frame::new(gradient(), 1, 30.0)));
    }

    #[test]
    fn test_luma_matches_bt601() {
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(255, 0, 0), 76);
        assert_eq!(luma(0, 255, 0), 150);
        assert_eq!(luma(0, 0, 255), 29);
    }

    #[test]
    fn test_histogram_is_l2_normalised() {
        let histogram = GrayHistogram::from_image(&half_split(10, 200));
        let norm: f32 = histogram.bins().iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_correlation_bounds() {
        let a = GrayHistogram::from_image(&solid(40));
        let b = GrayHistogram::from_image(&solid(220));
        assert!((a.correlation(&a) - 1.0).abs() < 1e-9);
        assert!(a.correlation(&b) < 0.1);
        assert!(a.correlation(&b) >= -1.0);
    }

    #[test]
    fn test_first_frame_always_selected() {
        let mut selector = HistogramChangeSelector::new(-1.0);
        assert!(selector.should_select(&Frame::new(solid(0), 0, 30.0)));
        assert!(!selector.should_select(&Frame::new(solid(255), 1, 30.0)));
    }

    #[test]
    fn test_reference_updates_only_on_selection() {
        let mut selector = HistogramChangeSelector::new(0.6);
        assert!(selector.should_select(&Frame::new(solid(20), 0, 30.0)));
        // Shares half its mass with the reference, correlation stays above 0.6
        assert!(!selector.should_select(&Frame::new(half_split(20, 200), 1, 30.0)));
        // Compared against frame 0, not frame 1
        assert!(selector.should_select(&Frame::new(solid(200), 2, 30.0)));
        assert_eq!(selector.selected_count(), 2);
    }

    #[test]
    fn test_identical_frames_selected_once() {
        let mut selector = HistogramChangeSelector::new(0.99);
        let picked = (0..50)
            .filter(|i| selector.should_select(&Frame::new(half_split(30, 90), *i, 30.0)))
            .count();
        assert_eq!(picked, 1);
    }
}
