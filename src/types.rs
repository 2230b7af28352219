//! Core types for visual search results and the request boundary

use crate::video::VideoInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Axis-aligned box in pixel coordinates of the source frame
///
/// Serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    #[must_use]
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box width, zero for degenerate boxes
    #[must_use]
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    /// Box height, zero for degenerate boxes
    #[must_use]
    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Whether the box has positive area
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.x1.is_finite()
            && self.y1.is_finite()
            && self.x2.is_finite()
            && self.y2.is_finite()
            && self.x1 < self.x2
            && self.y1 < self.y2
    }

    /// Clip to `[0, width] x [0, height]`
    #[must_use]
    pub fn clip(&self, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }

    /// Whether the box lies within `[0, width] x [0, height]`
    #[must_use]
    pub fn is_within(&self, width: u32, height: u32) -> bool {
        let w = width as f32;
        let h = height as f32;
        self.x1 >= 0.0 && self.y1 >= 0.0 && self.x2 <= w && self.y2 <= h
    }

    #[must_use]
    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(bbox: BoundingBox) -> Self {
        bbox.to_array()
    }
}

/// One detection in one frame, as returned by a [`Detector`](crate::detector::Detector)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Label, the query or the prompt that matched
    pub label: String,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Pixel-space box, clipped to the frame
    pub bbox: BoundingBox,
}

/// One detected instance of the query in one frame of the video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub label: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in pixels of the source frame
    pub bounding_box: BoundingBox,
    /// Seconds from the start of the video, `frame_id / fps`
    pub timestamp: f64,
    pub frame_id: u64,
}

impl DetectionResult {
    /// Attach frame position to a detection
    #[must_use]
    pub fn from_detection(detection: Detection, frame_id: u64, timestamp: f64) -> Self {
        Self {
            label: detection.label,
            confidence: detection.confidence,
            bounding_box: detection.bbox,
            timestamp,
            frame_id,
        }
    }
}

/// Search request at the service boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free-text concept to search for, e.g. "girl with pink shirt"
    #[serde(alias = "user_query")]
    pub query_text: String,
    /// Local path or `http(s)` URL of the video
    #[serde(alias = "s3_url")]
    pub video_location: String,
}

impl SearchRequest {
    pub fn new<Q: Into<String>, L: Into<String>>(query_text: Q, video_location: L) -> Self {
        Self {
            query_text: query_text.into(),
            video_location: video_location.into(),
        }
    }
}

/// Category of an error absorbed during a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Decoding stopped early; later frames were never seen
    FrameDecode,
    /// One candidate's inference failed and contributed no detections
    DetectionFailed,
    /// An annotated frame could not be written
    ArtifactWrite,
    /// The search stopped before all candidates were processed
    Cancelled,
}

/// Non-fatal problem recorded while searching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchWarning {
    pub kind: WarningKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<u64>,
    pub message: String,
}

impl SearchWarning {
    pub fn new<S: Into<String>>(kind: WarningKind, frame_id: Option<u64>, message: S) -> Self {
        Self {
            kind,
            frame_id,
            message: message.into(),
        }
    }
}

/// Result of one [`SearchOrchestrator::search`](crate::orchestrator::SearchOrchestrator::search)
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Query text as given
    pub query: String,
    /// Detections in non-decreasing frame order
    pub detections: Vec<DetectionResult>,
    /// Candidate frames sent to the detector
    pub frames_processed: u64,
    /// Frames decoded from the video
    pub frames_decoded: u64,
    /// Wall-clock duration of the search
    pub elapsed: Duration,
    /// Errors absorbed along the way
    pub warnings: Vec<SearchWarning>,
    /// Whether the search stopped early on cancellation
    pub cancelled: bool,
    /// Annotated frames written
    pub artifacts: Vec<PathBuf>,
    /// Properties of the searched video
    pub video: VideoInfo,
}

impl SearchOutcome {
    /// Whether any error was absorbed
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Convert into the wire response for `video_url`
    #[must_use]
    pub fn into_response<S: Into<String>>(self, video_url: S) -> SearchResponse {
        SearchResponse {
            query: self.query,
            video_url: video_url.into(),
            total_frames_processed: self.frames_processed,
            processing_time: self.elapsed.as_secs_f64(),
            detections: self.detections,
            created_at: Utc::now(),
            warnings: self.warnings,
        }
    }
}

/// Search response at the service boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub video_url: String,
    /// Candidate frames processed
    pub total_frames_processed: u64,
    /// Seconds
    pub processing_time: f64,
    pub detections: Vec<DetectionResult>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<SearchWarning>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_clip_and_validity() {
        let bbox = BoundingBox::new(-5.0, 10.0, 120.0, 250.0).clip(100, 200);
        assert_eq!(bbox, BoundingBox::new(0.0, 10.0, 100.0, 200.0));
        assert!(bbox.is_valid());
        assert!(bbox.is_within(100, 200));

        let degenerate = BoundingBox::new(150.0, 10.0, 180.0, 20.0).clip(100, 200);
        assert!(!degenerate.is_valid());
        assert_eq!(degenerate.width(), 0.0);
    }

    #[test]
    fn test_detection_result_wire_format() {
        let result = DetectionResult {
            label: "girl with pink shirt".to_string(),
            confidence: 0.85,
            bounding_box: BoundingBox::new(100.0, 150.0, 200.0, 300.0),
            timestamp: 120.5,
            frame_id: 3615,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["bounding_box"], serde_json::json!([100.0, 150.0, 200.0, 300.0]));
        assert_eq!(json["frame_id"], 3615);

        let back: DetectionResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_request_accepts_legacy_field_names() {
        let request: SearchRequest = serde_json::from_str(
            r#"{"user_query": "red car", "s3_url": "https://bucket.example/video.mp4"}"#,
        )
        .unwrap();
        assert_eq!(request.query_text, "red car");
        assert_eq!(request.video_location, "https://bucket.example/video.mp4");
    }

    #[test]
    fn test_response_omits_empty_warnings() {
        let response = SearchResponse {
            query: "q".to_string(),
            video_url: "v.mp4".to_string(),
            total_frames_processed: 2,
            processing_time: 0.5,
            detections: Vec::new(),
            created_at: Utc::now(),
            warnings: Vec::new(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("warnings").is_none());
        assert!(json.get("created_at").is_some());
    }
}
