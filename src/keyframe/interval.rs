//! Fixed-interval sampling

use crate::keyframe::KeyframeSelector;
use crate::video::Frame;

/// Keeps the first frame of every `interval_seconds` window
///
/// A frame is selected when `index % frames_per_interval == 0`, with
/// `frames_per_interval = max(1, round(fps * interval_seconds))`.
#[derive(Debug, Clone)]
pub struct IntervalSelector {
    frames_per_interval: u64,
}

impl IntervalSelector {
    /// Create a selector for a video at `fps`
    #[must_use]
    pub fn new(fps: f64, interval_seconds: f64) -> Self {
        Self {
            frames_per_interval: frames_per_interval(fps, interval_seconds),
        }
    }

    /// Number of frames between two selected frames
    #[must_use]
    pub fn frames_per_interval(&self) -> u64 {
        self.frames_per_interval
    }
}

/// Window length in frames, never less than one
#[must_use]
pub fn frames_per_interval(fps: f64, interval_seconds: f64) -> u64 {
    let frames = (fps * interval_seconds).round();
    if frames.is_finite() && frames >= 1.0 {
        frames as u64
    } else {
        1
    }
}

impl KeyframeSelector for IntervalSelector {
    fn should_select(&mut self, frame: &Frame) -> bool {
        frame.index % self.frames_per_interval == 0
    }

    fn name(&self) -> &'static str {
        "interval"
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_frames_per_interval_rounding() {
        assert_eq!(frames_per_interval(30.0, 60.0), 1800);
        assert_eq!(frames_per_interval(29.97, 60.0), 1798);
        assert_eq!(frames_per_interval(23.976, 1.0), 24);
        assert_eq!(frames_per_interval(30.0, 0.01), 1);
        assert_eq!(frames_per_interval(f64::NAN, 5.0), 1);
    }

    #[test]
    fn test_selects_interval_multiples_only() {
        let mut selector = IntervalSelector::new(10.0, 2.0);
        let picked: Vec<u64> = (0..65)
            .filter(|i| selector.should_select(&Frame::new(RgbImage::new(1, 1), *i, 10.0)))
            .collect();
        assert_eq!(picked, vec![0, 20, 40, 60]);
    }
}
