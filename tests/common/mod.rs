//! Shared fixtures for integration tests: synthetic videos and stub detectors

#![allow(dead_code)]

use evidence_vsearch::{
    video::MemoryVideoSource, BoundingBox, Detection, Detector, Frame, Result, SearchError,
};
use image::{Rgb, RgbImage};
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

pub const BACKGROUND: Rgb<u8> = Rgb([90, 90, 90]);
pub const OBJECT: Rgb<u8> = Rgb([220, 20, 20]);

/// Route library logs to the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Rectangle drawn into synthetic frames, in pixels `[x1, y1, x2, y2)`
#[derive(Debug, Clone, Copy)]
pub struct Rect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

/// `count` grey frames with a red rectangle on the frames in `visible`
pub fn frames_with_object(
    count: u64,
    (width, height): (u32, u32),
    visible: RangeInclusive<u64>,
    rect: Rect,
) -> Vec<RgbImage> {
    (0..count)
        .map(|index| {
            let mut image = RgbImage::from_pixel(width, height, BACKGROUND);
            if visible.contains(&index) {
                for y in rect.y1..rect.y2.min(height) {
                    for x in rect.x1..rect.x2.min(width) {
                        image.put_pixel(x, y, OBJECT);
                    }
                }
            }
            image
        })
        .collect()
}

/// `count` uniform frames of the given grey level
pub fn uniform_frames(count: usize, (width, height): (u32, u32), level: u8) -> Vec<RgbImage> {
    vec![RgbImage::from_pixel(width, height, Rgb([level, level, level])); count]
}

/// Memory source holding one video
pub fn memory_source(location: &str, fps: f64, frames: Vec<RgbImage>) -> MemoryVideoSource {
    MemoryVideoSource::new().with_video(location, fps, frames)
}

/// Finds the bounding box of red pixels
///
/// Stands in for a real model: any query matches, confidence is fixed.
#[derive(Debug, Clone, Default)]
pub struct RedObjectDetector {
    pub confidence: f32,
    fail_on: HashSet<u64>,
    calls: Arc<Mutex<Vec<u64>>>,
}

impl RedObjectDetector {
    pub fn new(confidence: f32) -> Self {
        Self {
            confidence,
            ..Self::default()
        }
    }

    /// Fail detection on these frame indices
    pub fn failing_on(mut self, frames: &[u64]) -> Self {
        self.fail_on = frames.iter().copied().collect();
        self
    }

    /// Frame indices seen by `detect`, shared with clones
    pub fn calls(&self) -> Arc<Mutex<Vec<u64>>> {
        Arc::clone(&self.calls)
    }
}

impl Detector for RedObjectDetector {
    fn detect(&mut self, frame: &Frame, query: &str, threshold: f32) -> Result<Vec<Detection>> {
        self.calls.lock().unwrap().push(frame.index);
        if self.fail_on.contains(&frame.index) {
            return Err(SearchError::detection_failed(frame.index, "stub failure"));
        }
        if self.confidence < threshold {
            return Ok(Vec::new());
        }

        let red: Vec<(u32, u32)> = frame
            .image
            .enumerate_pixels()
            .filter(|(_, _, p)| **p == OBJECT)
            .map(|(x, y, _)| (x, y))
            .collect();
        if red.is_empty() {
            return Ok(Vec::new());
        }

        let x1 = red.iter().map(|p| p.0).min().unwrap();
        let y1 = red.iter().map(|p| p.1).min().unwrap();
        let x2 = red.iter().map(|p| p.0).max().unwrap() + 1;
        let y2 = red.iter().map(|p| p.1).max().unwrap() + 1;
        Ok(vec![Detection {
            label: query.to_string(),
            confidence: self.confidence,
            bbox: BoundingBox::new(x1 as f32, y1 as f32, x2 as f32, y2 as f32),
        }])
    }

    fn name(&self) -> &str {
        "red-object"
    }
}
