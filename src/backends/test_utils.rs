//! Test utilities and mock backends for testing inference functionality
//!
//! Mock implementations of the `InferenceBackend` trait so the detector and
//! orchestrator can be tested without model files or ONNX Runtime.

use crate::{
    error::{Result, SearchError},
    inference::{InferenceBackend, RawDetection},
};
use image::RgbImage;
use instant::Duration;
use std::sync::{Arc, Mutex};

/// Mock zero-shot backend returning a fixed set of raw detections
#[derive(Debug, Clone)]
pub struct MockBackend {
    /// Whether the backend has been initialized
    initialized: bool,
    /// Raw detections returned by every successful call
    detections: Vec<RawDetection>,
    /// Call history for verification in tests
    call_history: Arc<Mutex<Vec<String>>>,
    /// Whether to simulate initialization failure
    should_fail_init: bool,
    /// 1-based `infer` call numbers that fail
    failing_calls: Vec<usize>,
    infer_calls: usize,
}

impl MockBackend {
    /// Create a mock backend returning `detections` for every frame
    #[must_use]
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self {
            initialized: false,
            detections,
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            failing_calls: Vec::new(),
            infer_calls: 0,
        }
    }

    /// Create a mock backend that will fail during initialization
    #[must_use]
    pub fn new_failing_init() -> Self {
        let mut backend = Self::new(Vec::new());
        backend.should_fail_init = true;
        backend
    }

    /// Fail the given 1-based `infer` calls
    #[must_use]
    pub fn failing_on_calls(mut self, calls: &[usize]) -> Self {
        self.failing_calls = calls.to_vec();
        self
    }

    /// Shared handle to the call history
    #[must_use]
    pub fn call_history(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    /// Record a method call for testing verification
    fn record_call(&self, entry: String) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(entry);
        }
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self) -> Result<Option<Duration>> {
        self.record_call("initialize".to_string());

        if self.should_fail_init {
            return Err(SearchError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }

        self.initialized = true;
        Ok(Some(Duration::from_millis(150)))
    }

    fn infer(&mut self, image: &RgbImage, prompts: &[String]) -> Result<Vec<RawDetection>> {
        self.infer_calls += 1;
        self.record_call(format!(
            "infer {}x{} {:?}",
            image.width(),
            image.height(),
            prompts
        ));

        if !self.initialized {
            return Err(SearchError::inference("Mock backend not initialized"));
        }
        if self.failing_calls.contains(&self.infer_calls) {
            return Err(SearchError::inference(format!(
                "Mock backend inference failed on call {}",
                self.infer_calls
            )));
        }

        Ok(self.detections.clone())
    }

    fn model_name(&self) -> &str {
        "mock-detector"
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_backend_records_calls() {
        let mut backend = MockBackend::new(vec![RawDetection::new([0.0, 0.0, 1.0, 1.0], 0.5, 0)]);
        let history = backend.call_history();

        backend.initialize().unwrap();
        backend
            .infer(&RgbImage::new(4, 2), &["dog".to_string()])
            .unwrap();

        let calls = history.lock().unwrap().clone();
        assert_eq!(calls, vec!["initialize".to_string(), "infer 4x2 [\"dog\"]".to_string()]);
    }

    #[test]
    fn test_mock_backend_failures() {
        assert!(MockBackend::new_failing_init().initialize().is_err());

        let mut backend = MockBackend::new(vec![]).failing_on_calls(&[2]);
        backend.initialize().unwrap();
        let image = RgbImage::new(2, 2);
        let prompts = vec!["dog".to_string()];
        assert!(backend.infer(&image, &prompts).is_ok());
        assert!(backend.infer(&image, &prompts).is_err());
        assert!(backend.infer(&image, &prompts).is_ok());
    }
}
