//! Error types for visual search operations

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for visual search operations
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors raised while searching a video for a visual concept
///
/// Only [`SearchError::VideoUnavailable`] aborts a running search. Frame
/// decode, detection and artifact failures are absorbed by the orchestrator
/// and reported as warnings on the outcome.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The video container could not be opened or read at all
    #[error("Video unavailable '{location}': {reason}")]
    VideoUnavailable { location: String, reason: String },

    /// Decoding failed part-way through the stream
    #[error("Frame decode failed at frame {frame_index}: {reason}")]
    FrameDecode { frame_index: u64, reason: String },

    /// The detector failed on a single candidate frame
    #[error("Detection failed for frame {frame_index}: {reason}")]
    DetectionFailed { frame_index: u64, reason: String },

    /// An annotated frame could not be written
    #[error("Failed to write artifact '{}': {reason}", path.display())]
    ArtifactWrite { path: PathBuf, reason: String },

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding or decoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Model inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Network errors while fetching models or remote videos
    #[error("Network error: {0}")]
    Network(String),

    /// Tensor or pixel processing errors
    #[error("Processing error: {0}")]
    Processing(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// Create a video-unavailable error for a location
    pub fn video_unavailable<L: AsRef<str>, S: Into<String>>(location: L, reason: S) -> Self {
        Self::VideoUnavailable {
            location: location.as_ref().to_string(),
            reason: reason.into(),
        }
    }

    /// Create a mid-stream decode error
    pub fn frame_decode<S: Into<String>>(frame_index: u64, reason: S) -> Self {
        Self::FrameDecode {
            frame_index,
            reason: reason.into(),
        }
    }

    /// Create a per-frame detection error
    pub fn detection_failed<S: Into<String>>(frame_index: u64, reason: S) -> Self {
        Self::DetectionFailed {
            frame_index,
            reason: reason.into(),
        }
    }

    /// Create an artifact write error
    pub fn artifact_write<P: AsRef<Path>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::ArtifactWrite {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a network error with context
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// Whether this error must abort the whole search request
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::FrameDecode { .. } | Self::DetectionFailed { .. } | Self::ArtifactWrite { .. }
        )
    }

    /// Frame index this error is attached to, if any
    #[must_use]
    pub fn frame_index(&self) -> Option<u64> {
        match self {
            Self::FrameDecode { frame_index, .. } | Self::DetectionFailed { frame_index, .. } => {
                Some(*frame_index)
            },
            _ => None,
        }
    }
}
