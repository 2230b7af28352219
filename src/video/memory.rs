//! In-memory video source
//!
//! Serves pre-decoded frames registered under a location. Used by tests,
//! benchmarks and callers that already hold decoded imagery.

use crate::error::{Result, SearchError};
use crate::video::{effective_fps, Frame, VideoHandle, VideoInfo, VideoSource, DEFAULT_FPS};
use image::RgbImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct MemoryVideo {
    fps: f64,
    frames: Arc<Vec<RgbImage>>,
    fail_at: Option<u64>,
}

/// Video source serving registered frame sequences
#[derive(Debug, Clone)]
pub struct MemoryVideoSource {
    videos: HashMap<PathBuf, MemoryVideo>,
    fallback_fps: f64,
}

impl MemoryVideoSource {
    /// Create an empty source; every location is unavailable until registered
    #[must_use]
    pub fn new() -> Self {
        Self {
            videos: HashMap::new(),
            fallback_fps: DEFAULT_FPS,
        }
    }

    /// Override the frame rate assumed for videos registered without a usable one
    #[must_use]
    pub fn with_fallback_fps(mut self, fps: f64) -> Self {
        self.fallback_fps = effective_fps(fps, DEFAULT_FPS);
        self
    }

    /// Register frames under `location` at `fps`
    #[must_use]
    pub fn with_video<P: Into<PathBuf>>(mut self, location: P, fps: f64, frames: Vec<RgbImage>) -> Self {
        self.insert(location, fps, frames);
        self
    }

    /// Register frames under `location`, failing to decode frame `fail_at`
    #[must_use]
    pub fn with_corrupt_video<P: Into<PathBuf>>(
        mut self,
        location: P,
        fps: f64,
        frames: Vec<RgbImage>,
        fail_at: u64,
    ) -> Self {
        self.videos.insert(
            location.into(),
            MemoryVideo {
                fps,
                frames: Arc::new(frames),
                fail_at: Some(fail_at),
            },
        );
        self
    }

    /// Register frames under `location` at `fps`
    pub fn insert<P: Into<PathBuf>>(&mut self, location: P, fps: f64, frames: Vec<RgbImage>) {
        self.videos.insert(
            location.into(),
            MemoryVideo {
                fps,
                frames: Arc::new(frames),
                fail_at: None,
            },
        );
    }
}

impl Default for MemoryVideoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSource for MemoryVideoSource {
    fn open(&self, location: &Path) -> Result<Box<dyn VideoHandle>> {
        let video = self.videos.get(location).ok_or_else(|| {
            SearchError::video_unavailable(location.display().to_string(), "no such video")
        })?;

        let (width, height) = video.frames.first().map_or((0, 0), RgbImage::dimensions);

        Ok(Box::new(MemoryHandle {
            info: VideoInfo {
                location: location.display().to_string(),
                fps: effective_fps(video.fps, self.fallback_fps),
                width,
                height,
                total_frames: Some(video.frames.len() as u64),
                codec: None,
            },
            frames: Arc::clone(&video.frames),
            fail_at: video.fail_at,
            position: 0,
            finished: false,
        }))
    }
}

struct MemoryHandle {
    info: VideoInfo,
    frames: Arc<Vec<RgbImage>>,
    fail_at: Option<u64>,
    position: u64,
    finished: bool,
}

impl VideoHandle for MemoryHandle {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Option<Result<Frame>> {
        if self.finished {
            return None;
        }

        if self.fail_at == Some(self.position) {
            self.finished = true;
            return Some(Err(SearchError::frame_decode(
                self.position,
                "corrupt frame data",
            )));
        }

        let Some(image) = self.frames.get(self.position as usize) else {
            self.finished = true;
            return None;
        };

        let frame = Frame::new(image.clone(), self.position, self.info.fps);
        self.position += 1;
        Some(Ok(frame))
    }
}
