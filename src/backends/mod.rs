//! Backend implementations for different inference engines
//!
//! - ONNX Runtime backend running OWL-style zero-shot detectors (feature `onnx`)
//! - Mock backends for unit tests

#[cfg(feature = "onnx")]
pub mod onnx;

// Test utilities for backend testing
#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;
