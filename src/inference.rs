//! Inference backend abstraction
//!
//! A backend wraps one loaded zero-shot detection model. It receives a
//! frame and a batch of text prompts and returns raw detections with boxes
//! normalised to the frame; thresholding, rescaling and clipping happen in
//! [`crate::detector`].

use crate::error::Result;
use image::RgbImage;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// One unfiltered model detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    /// `[x1/W, y1/H, x2/W, y2/H]` relative to the frame
    pub bbox: [f32; 4],
    /// Model score, not yet thresholded
    pub score: f32,
    /// Index of the matching prompt in the batch
    pub prompt_index: usize,
}

impl RawDetection {
    #[must_use]
    pub fn new(bbox: [f32; 4], score: f32, prompt_index: usize) -> Self {
        Self {
            bbox,
            score,
            prompt_index,
        }
    }
}

/// Trait for inference backends
///
/// Model objects are not assumed reentrant: a backend is owned by one worker
/// at a time, hence `&mut self` everywhere.
pub trait InferenceBackend: Send {
    /// Load the model; returns the load time on first call, `None` afterwards
    ///
    /// # Errors
    /// - Model files missing or unreadable
    /// - Runtime session creation failures
    fn initialize(&mut self) -> Result<Option<Duration>>;

    /// Run the model on one frame against a batch of text prompts
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Tensor conversion or model execution failures
    fn infer(&mut self, image: &RgbImage, prompts: &[String]) -> Result<Vec<RawDetection>>;

    /// Model name for logs and spans
    fn model_name(&self) -> &str;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}
