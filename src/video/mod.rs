//! Video sources
//!
//! A [`VideoSource`] opens a container by location and hands out a
//! [`VideoHandle`], an exclusive, forward-only decoder over that container.
//! [`Frames`] wraps a handle as a lazy iterator that ends at end-of-stream or
//! at the first decode error, so frames already yielded are never lost.
//!
//! Handles release their decode resources when dropped; a second traversal
//! requires opening the video again.

#[cfg(feature = "video-support")]
pub mod ffmpeg;

pub mod frame;
pub mod memory;

#[cfg(feature = "video-support")]
pub use ffmpeg::FfmpegVideoSource;

pub use frame::{frame_timestamp, DecodeStats, Frame};
pub use memory::MemoryVideoSource;

use crate::error::{Result, SearchError};
use serde::Serialize;
use std::path::Path;

/// Frame rate used when the container does not report a usable one
pub const DEFAULT_FPS: f64 = 30.0;

/// Container formats recognised by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    /// MP4 format (H.264/H.265)
    Mp4,
    /// AVI format
    Avi,
    /// MOV format (QuickTime)
    Mov,
    /// MKV format (Matroska)
    Mkv,
    /// WebM format
    WebM,
}

impl VideoFormat {
    /// Get file extension for the video format
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
            Self::Mov => "mov",
            Self::Mkv => "mkv",
            Self::WebM => "webm",
        }
    }

    /// Detect format from file extension
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp4" | "m4v" => Some(Self::Mp4),
            "avi" => Some(Self::Avi),
            "mov" => Some(Self::Mov),
            "mkv" => Some(Self::Mkv),
            "webm" => Some(Self::WebM),
            _ => None,
        }
    }
}

/// Properties of an opened video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    /// Location the video was opened from
    pub location: String,
    /// Frames per second, always > 0
    pub fps: f64,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Total frame count, when the container reports one
    pub total_frames: Option<u64>,
    /// Codec name, when known
    pub codec: Option<String>,
}

/// Sanitise a reported frame rate, falling back to `fallback` when unusable
#[must_use]
pub fn effective_fps(reported: f64, fallback: f64) -> f64 {
    if reported.is_finite() && reported > 0.0 {
        reported
    } else {
        fallback
    }
}

/// Opens videos for sequential decoding
pub trait VideoSource: Send {
    /// Open the video at `location`
    ///
    /// # Errors
    /// - `SearchError::VideoUnavailable` when the path is missing, the
    ///   container is corrupt or no decodable video stream exists
    fn open(&self, location: &Path) -> Result<Box<dyn VideoHandle>>;
}

/// Exclusive, forward-only decoder over one opened video
pub trait VideoHandle {
    /// Properties of the opened video
    fn info(&self) -> &VideoInfo;

    /// Decode the next frame
    ///
    /// Returns `None` at end of stream. A `SearchError::FrameDecode` ends the
    /// traversal; callers must not pull again after an error.
    fn next_frame(&mut self) -> Option<Result<Frame>>;
}

/// Lazy frame sequence over a handle
pub fn frames(handle: &mut dyn VideoHandle) -> Frames<'_> {
    Frames::new(handle)
}

/// Iterator adapter that yields frames in strictly increasing index order
///
/// The first decode error ends the sequence and is kept for inspection via
/// [`Frames::take_error`].
pub struct Frames<'a> {
    handle: &'a mut dyn VideoHandle,
    last_index: Option<u64>,
    stats: DecodeStats,
    error: Option<SearchError>,
    finished: bool,
}

impl<'a> Frames<'a> {
    /// Wrap a handle
    pub fn new(handle: &'a mut dyn VideoHandle) -> Self {
        Self {
            handle,
            last_index: None,
            stats: DecodeStats::default(),
            error: None,
            finished: false,
        }
    }

    /// Properties of the underlying video
    #[must_use]
    pub fn info(&self) -> &VideoInfo {
        self.handle.info()
    }

    /// Decode counters so far
    #[must_use]
    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// The error that truncated the stream, if any
    pub fn take_error(&mut self) -> Option<SearchError> {
        self.error.take()
    }

    fn truncate(&mut self, error: SearchError) {
        log::warn!(
            "Frame stream truncated after {} frames: {}",
            self.stats.frames_decoded,
            error
        );
        self.stats.truncated = true;
        self.error = Some(error);
        self.finished = true;
    }
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }

        match self.handle.next_frame() {
            None => {
                self.finished = true;
                None
            },
            Some(Ok(frame)) => {
                if let Some(last) = self.last_index {
                    if frame.index <= last {
                        self.truncate(SearchError::frame_decode(
                            frame.index,
                            format!("frame index {} does not follow {}", frame.index, last),
                        ));
                        return None;
                    }
                }
                self.last_index = Some(frame.index);
                self.stats.frames_decoded += 1;
                Some(frame)
            },
            Some(Err(error)) => {
                self.truncate(error);
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    struct ScriptedHandle {
        info: VideoInfo,
        items: std::vec::IntoIter<Result<Frame>>,
        pulls_after_end: usize,
    }

    impl VideoHandle for ScriptedHandle {
        fn info(&self) -> &VideoInfo {
            &self.info
        }

        fn next_frame(&mut self) -> Option<Result<Frame>> {
            let next = self.items.next();
            if next.is_none() {
                self.pulls_after_end += 1;
            }
            next
        }
    }

    fn scripted(items: Vec<Result<Frame>>) -> ScriptedHandle {
        ScriptedHandle {
            info: VideoInfo {
                location: "scripted".to_string(),
                fps: 10.0,
                width: 4,
                height: 4,
                total_frames: None,
                codec: None,
            },
            items: items.into_iter(),
            pulls_after_end: 0,
        }
    }

    fn frame(index: u64) -> Frame {
        Frame::new(RgbImage::new(4, 4), index, 10.0)
    }

    #[test]
    fn test_frames_stop_at_decode_error_keeping_prefix() {
        let mut handle = scripted(vec![
            Ok(frame(0)),
            Ok(frame(1)),
            Err(SearchError::frame_decode(2, "bad packet")),
            Ok(frame(3)),
        ]);
        let mut frames = frames(&mut handle);
        let indices: Vec<u64> = frames.by_ref().map(|f| f.index).collect();

        assert_eq!(indices, vec![0, 1]);
        assert!(frames.stats().truncated);
        assert_eq!(frames.stats().frames_decoded, 2);
        assert!(matches!(
            frames.take_error(),
            Some(SearchError::FrameDecode { frame_index: 2, .. })
        ));
        assert!(frames.next().is_none());
    }

    #[test]
    fn test_frames_reject_non_increasing_indices() {
        let mut handle = scripted(vec![Ok(frame(0)), Ok(frame(5)), Ok(frame(5))]);
        let mut frames = frames(&mut handle);
        let indices: Vec<u64> = frames.by_ref().map(|f| f.index).collect();

        assert_eq!(indices, vec![0, 5]);
        assert!(frames.stats().truncated);
    }

    #[test]
    fn test_frames_do_not_pull_after_end() {
        let mut handle = scripted(vec![Ok(frame(0))]);
        {
            let mut frames = frames(&mut handle);
            assert_eq!(frames.by_ref().count(), 1);
            assert!(frames.next().is_none());
            assert!(!frames.stats().truncated);
        }
        assert_eq!(handle.pulls_after_end, 1);
    }

    #[test]
    fn test_effective_fps_fallback() {
        assert_eq!(effective_fps(25.0, DEFAULT_FPS), 25.0);
        assert_eq!(effective_fps(0.0, DEFAULT_FPS), 30.0);
        assert_eq!(effective_fps(f64::NAN, DEFAULT_FPS), 30.0);
        assert_eq!(effective_fps(-1.0, 24.0), 24.0);
    }

    #[test]
    fn test_video_format_detection() {
        assert_eq!(VideoFormat::from_extension("MP4"), Some(VideoFormat::Mp4));
        assert_eq!(VideoFormat::from_extension("webm"), Some(VideoFormat::WebM));
        assert_eq!(VideoFormat::from_extension("txt"), None);
        assert_eq!(VideoFormat::Mkv.extension(), "mkv");
    }
}
