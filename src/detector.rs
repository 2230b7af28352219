//! Zero-shot detector contract
//!
//! [`Detector`] is the seam the orchestrator depends on. [`ZeroShotDetector`]
//! adapts any [`InferenceBackend`] to it: the query becomes a single-prompt
//! batch, low-confidence detections are discarded, and frame-normalised
//! boxes are rescaled to pixels and clipped to the frame.

use crate::error::{Result, SearchError};
use crate::inference::{InferenceBackend, RawDetection};
use crate::types::{BoundingBox, Detection};
use crate::video::Frame;
use instant::Duration;

/// Text-conditioned object detector
pub trait Detector: Send {
    /// Detect `query` in `frame`, keeping detections with confidence `>= threshold`
    ///
    /// Detections keep the model's order. Boxes are in pixels of the frame.
    ///
    /// # Errors
    /// - [`SearchError::DetectionFailed`] when the model call fails for this frame
    fn detect(&mut self, frame: &Frame, query: &str, threshold: f32) -> Result<Vec<Detection>>;

    /// Detector name for logs
    fn name(&self) -> &str {
        "detector"
    }

    /// Release model resources
    fn shutdown(&mut self) {}
}

/// [`Detector`] backed by an [`InferenceBackend`]
pub struct ZeroShotDetector {
    backend: Box<dyn InferenceBackend>,
    load_time: Option<Duration>,
}

impl ZeroShotDetector {
    /// Wrap a backend and load its model
    ///
    /// # Errors
    /// - Backend initialization failures
    pub fn new(mut backend: Box<dyn InferenceBackend>) -> Result<Self> {
        let load_time = backend.initialize()?;
        if let Some(load_time) = load_time {
            log::info!(
                "Detector model {} loaded in {:.0}ms",
                backend.model_name(),
                load_time.as_secs_f64() * 1000.0
            );
        }
        Ok(Self { backend, load_time })
    }

    /// Build the ONNX Runtime detector described by `config`
    ///
    /// # Errors
    /// - Model resolution or loading failures
    #[cfg(feature = "onnx")]
    pub fn from_config(config: &crate::config::DetectorConfig) -> Result<Self> {
        let backend = crate::backends::OnnxBackend::from_config(config)?;
        Self::new(Box::new(backend))
    }

    /// Model load time, if this detector loaded the model
    #[must_use]
    pub fn load_time(&self) -> Option<Duration> {
        self.load_time
    }

    /// Underlying backend
    #[must_use]
    pub fn backend(&self) -> &dyn InferenceBackend {
        self.backend.as_ref()
    }
}

impl std::fmt::Debug for ZeroShotDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroShotDetector")
            .field("model", &self.backend.model_name())
            .field("initialized", &self.backend.is_initialized())
            .finish()
    }
}

impl Detector for ZeroShotDetector {
    fn detect(&mut self, frame: &Frame, query: &str, threshold: f32) -> Result<Vec<Detection>> {
        let prompts = [query.to_string()];
        let span = crate::tracing_config::spans::inference(self.backend.model_name(), frame.dimensions());
        let _guard = span.enter();

        let raw = self
            .backend
            .infer(&frame.image, &prompts)
            .map_err(|e| SearchError::detection_failed(frame.index, e.to_string()))?;

        let (width, height) = frame.dimensions();
        let detections = postprocess(raw, &prompts, query, width, height, threshold);
        tracing::debug!(kept = detections.len(), "Detections above threshold");
        Ok(detections)
    }

    fn name(&self) -> &str {
        self.backend.model_name()
    }
}

/// Rescale a frame-normalised box to pixels
///
/// `[x1, y1, x2, y2]` is multiplied by `[W, H, W, H]`; the result is not clipped.
///
/// # Examples
/// ```
/// use evidence_vsearch::detector::rescale_box;
///
/// // A 100 wide, 200 high frame
/// let bbox = rescale_box([0.5, 0.5, 0.6, 0.6], 100, 200);
/// assert_eq!(bbox.to_array(), [50.0, 100.0, 60.0, 120.0]);
/// ```
#[must_use]
pub fn rescale_box(normalized: [f32; 4], width: u32, height: u32) -> BoundingBox {
    let w = width as f32;
    let h = height as f32;
    let [x1, y1, x2, y2] = normalized;
    BoundingBox::new(x1 * w, y1 * h, x2 * w, y2 * h)
}

/// Threshold, rescale, clip and label raw detections
///
/// Non-finite scores and boxes that are empty after clipping are dropped.
/// The label is the matching prompt, or `query` if the prompt index is out
/// of range.
#[must_use]
pub fn postprocess(
    raw: Vec<RawDetection>,
    prompts: &[String],
    query: &str,
    width: u32,
    height: u32,
    threshold: f32,
) -> Vec<Detection> {
    raw.into_iter()
        .filter(|det| det.score.is_finite() && det.score >= threshold)
        .filter_map(|det| {
            let bbox = rescale_box(det.bbox, width, height).clip(width, height);
            if !bbox.is_valid() {
                log::trace!("Dropping empty box {:?}", det.bbox);
                return None;
            }
            let label = prompts
                .get(det.prompt_index)
                .map_or_else(|| query.to_string(), Clone::clone);
            Some(Detection {
                label,
                confidence: det.score.clamp(0.0, 1.0),
                bbox,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::MockBackend;
    use image::RgbImage;

    fn frame(width: u32, height: u32) -> Frame {
        Frame::new(RgbImage::new(width, height), 30, 30.0)
    }

    fn detector(raw: Vec<RawDetection>) -> ZeroShotDetector {
        ZeroShotDetector::new(Box::new(MockBackend::new(raw))).unwrap()
    }

    #[test]
    fn test_threshold_keeps_order() {
        let mut detector = detector(vec![
            RawDetection::new([0.1, 0.1, 0.2, 0.2], 0.1, 0),
            RawDetection::new([0.2, 0.2, 0.3, 0.3], 0.2, 0),
            RawDetection::new([0.3, 0.3, 0.4, 0.4], 0.4, 0),
        ]);

        let detections = detector.detect(&frame(100, 100), "cat", 0.15).unwrap();
        let scores: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
        assert_eq!(scores, vec![0.2, 0.4]);
        assert!(detections.iter().all(|d| d.label == "cat"));
    }

    #[test]
    fn test_boxes_are_rescaled_and_clipped() {
        let mut detector = detector(vec![
            RawDetection::new([0.5, 0.5, 0.6, 0.6], 0.9, 0),
            RawDetection::new([-0.2, 0.9, 0.5, 1.4], 0.9, 0),
            RawDetection::new([1.2, 0.1, 1.5, 0.2], 0.9, 0),
        ]);

        let detections = detector.detect(&frame(100, 200), "cat", 0.15).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].bbox.to_array(), [50.0, 100.0, 60.0, 120.0]);
        assert_eq!(detections[1].bbox.to_array(), [0.0, 180.0, 50.0, 200.0]);
        assert!(detections.iter().all(|d| d.bbox.is_within(100, 200)));
    }

    #[test]
    fn test_non_finite_scores_dropped() {
        let mut detector = detector(vec![
            RawDetection::new([0.1, 0.1, 0.2, 0.2], f32::NAN, 0),
            RawDetection::new([0.1, 0.1, 0.2, 0.2], 1.3, 7),
        ]);

        let detections = detector.detect(&frame(10, 10), "cat", 0.15).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence, 1.0);
        assert_eq!(detections[0].label, "cat");
    }

    #[test]
    fn test_backend_failure_maps_to_detection_failed() {
        let backend = MockBackend::new(vec![]).failing_on_calls(&[1]);
        let mut detector = ZeroShotDetector::new(Box::new(backend)).unwrap();

        let err = detector.detect(&frame(10, 10), "cat", 0.15).unwrap_err();
        assert!(matches!(err, SearchError::DetectionFailed { frame_index: 30, .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_single_prompt_batch() {
        let backend = MockBackend::new(vec![]);
        let history = backend.call_history();
        let mut detector = ZeroShotDetector::new(Box::new(backend)).unwrap();
        assert!(detector.load_time().is_some());

        detector.detect(&frame(4, 2), "girl with pink shirt", 0.15).unwrap();
        let calls = history.lock().unwrap().clone();
        assert_eq!(calls.last().unwrap(), "infer 4x2 [\"girl with pink shirt\"]");
    }

    #[test]
    fn test_initialization_failure_is_fatal() {
        let err = ZeroShotDetector::new(Box::new(MockBackend::new_failing_init())).unwrap_err();
        assert!(matches!(err, SearchError::Model(_)));
    }
}
