//! Configuration types for visual search

use crate::error::{Result, SearchError};
use crate::keyframe::{selector_for, KeyframeSelector};
use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default sampling interval for the interval policy, in seconds
pub const DEFAULT_INTERVAL_SECONDS: f64 = 60.0;

/// Default correlation threshold for the histogram-change policy
pub const DEFAULT_HISTOGRAM_THRESHOLD: f64 = 0.6;

/// Default minimum detection confidence
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.15;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Which frames are sent to the detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyframePolicy {
    /// First frame of every `interval_seconds` window
    Interval { interval_seconds: f64 },
    /// Frames whose histogram correlation with the last selected frame
    /// falls below `threshold`
    HistogramChange { threshold: f64 },
}

impl Default for KeyframePolicy {
    fn default() -> Self {
        Self::Interval {
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
        }
    }
}

impl KeyframePolicy {
    /// Interval policy with the given window length
    #[must_use]
    pub fn interval(interval_seconds: f64) -> Self {
        Self::Interval { interval_seconds }
    }

    /// Histogram-change policy with the given threshold
    #[must_use]
    pub fn histogram_change(threshold: f64) -> Self {
        Self::HistogramChange { threshold }
    }

    /// Build a fresh selector for a video at `fps`
    #[must_use]
    pub fn selector(&self, fps: f64) -> Box<dyn KeyframeSelector> {
        selector_for(self, fps)
    }

    /// Validate policy parameters
    ///
    /// # Errors
    /// - Interval not finite or not positive
    /// - Histogram threshold outside [-1, 1]
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Interval { interval_seconds } => {
                if !interval_seconds.is_finite() || interval_seconds <= 0.0 {
                    return Err(SearchError::config_value_error(
                        "interval_seconds",
                        interval_seconds,
                        "> 0",
                    ));
                }
            },
            Self::HistogramChange { threshold } => {
                if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
                    return Err(SearchError::config_value_error(
                        "histogram threshold",
                        threshold,
                        "-1.0-1.0",
                    ));
                }
            },
        }
        Ok(())
    }
}

impl std::fmt::Display for KeyframePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval { interval_seconds } => write!(f, "interval({interval_seconds}s)"),
            Self::HistogramChange { threshold } => write!(f, "histogram-change({threshold})"),
        }
    }
}

/// Image format for annotated frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    #[default]
    Jpeg,
    Png,
}

impl ArtifactFormat {
    /// File extension without the dot
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

/// Where and how annotated frames are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Write annotated frames for candidates with detections
    pub enabled: bool,
    /// Output directory, created on first write
    pub output_dir: PathBuf,
    pub format: ArtifactFormat,
    /// JPEG quality (1-100, only used for JPEG output)
    pub jpeg_quality: u8,
    /// Box and caption colour
    pub box_color: [u8; 3],
    /// Box line thickness in pixels
    pub box_thickness: u32,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: PathBuf::from("trial"),
            format: ArtifactFormat::default(),
            jpeg_quality: 90,
            box_color: [0, 255, 0],
            box_thickness: 2,
        }
    }
}

impl ArtifactConfig {
    /// Enabled artifact output into `output_dir`
    pub fn to_dir<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            enabled: true,
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Validate artifact parameters
    ///
    /// # Errors
    /// - JPEG quality outside 1-100
    /// - Zero box thickness
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(SearchError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "1-100",
            ));
        }
        if self.box_thickness == 0 {
            return Err(SearchError::config_value_error("box thickness", 0, ">= 1"));
        }
        Ok(())
    }
}

/// Configuration for one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Keyframe sampling policy
    pub keyframe_policy: KeyframePolicy,
    /// Detections below this confidence are discarded and never drawn
    pub detection_threshold: f32,
    /// Frame rate assumed when the container reports none
    pub fallback_fps: f64,
    /// Stop after this many candidates
    pub max_candidates: Option<u64>,
    /// Annotated frame output
    pub artifacts: ArtifactConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keyframe_policy: KeyframePolicy::default(),
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            fallback_fps: crate::video::DEFAULT_FPS,
            max_candidates: None,
            artifacts: ArtifactConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use evidence_vsearch::{KeyframePolicy, SearchConfig};
    ///
    /// let config = SearchConfig::builder()
    ///     .keyframe_policy(KeyframePolicy::histogram_change(0.6))
    ///     .detection_threshold(0.3)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.detection_threshold, 0.3);
    /// ```
    #[must_use]
    pub fn builder() -> SearchConfigBuilder {
        SearchConfigBuilder::default()
    }

    /// Load and validate a configuration from a JSON file
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    /// - File cannot be read
    /// - Invalid JSON
    /// - Values out of range
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SearchError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            SearchError::invalid_config(format!(
                "Failed to parse config file '{}': {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Invalid keyframe policy parameters
    /// - Detection threshold outside [0, 1]
    /// - Fallback frame rate not positive
    /// - `max_candidates` of zero
    /// - Invalid artifact settings
    pub fn validate(&self) -> Result<()> {
        self.keyframe_policy.validate()?;

        if !self.detection_threshold.is_finite() || !(0.0..=1.0).contains(&self.detection_threshold)
        {
            return Err(SearchError::config_value_error(
                "detection_threshold",
                self.detection_threshold,
                "0.0-1.0",
            ));
        }

        if !self.fallback_fps.is_finite() || self.fallback_fps <= 0.0 {
            return Err(SearchError::config_value_error(
                "fallback_fps",
                self.fallback_fps,
                "> 0",
            ));
        }

        if self.max_candidates == Some(0) {
            return Err(SearchError::config_value_error("max_candidates", 0, ">= 1"));
        }

        self.artifacts.validate()
    }
}

/// Builder for `SearchConfig`
#[derive(Debug, Default)]
pub struct SearchConfigBuilder {
    config: SearchConfig,
}

impl SearchConfigBuilder {
    /// Set keyframe policy
    #[must_use]
    pub fn keyframe_policy(mut self, policy: KeyframePolicy) -> Self {
        self.config.keyframe_policy = policy;
        self
    }

    /// Set detection threshold
    #[must_use]
    pub fn detection_threshold(mut self, threshold: f32) -> Self {
        self.config.detection_threshold = threshold;
        self
    }

    /// Set fallback frame rate
    #[must_use]
    pub fn fallback_fps(mut self, fps: f64) -> Self {
        self.config.fallback_fps = fps;
        self
    }

    /// Limit the number of candidates sent to the detector
    #[must_use]
    pub fn max_candidates(mut self, max: Option<u64>) -> Self {
        self.config.max_candidates = max;
        self
    }

    /// Set artifact configuration
    #[must_use]
    pub fn artifacts(mut self, artifacts: ArtifactConfig) -> Self {
        self.config.artifacts = artifacts;
        self
    }

    /// Write annotated frames into `dir`
    #[must_use]
    pub fn artifacts_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.artifacts.enabled = true;
        self.config.artifacts.output_dir = dir.into();
        self
    }

    /// Set artifact image format
    #[must_use]
    pub fn artifact_format(mut self, format: ArtifactFormat) -> Self {
        self.config.artifacts.format = format;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`SearchConfig::validate`]
    pub fn build(self) -> Result<SearchConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration for the production zero-shot detector
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Model folder to load
    pub model_spec: ModelSpec,
    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,
    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl DetectorConfig {
    #[must_use]
    pub fn new(model_spec: ModelSpec) -> Self {
        Self {
            model_spec,
            ..Self::default()
        }
    }

    /// Set execution provider
    #[must_use]
    pub fn with_execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.execution_provider = provider;
        self
    }

    /// Set both intra and inter threads (inter = threads / 2, minimum 1; 0 = auto)
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads;
        self.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SearchConfig::default();
        assert_eq!(
            config.keyframe_policy,
            KeyframePolicy::Interval {
                interval_seconds: 60.0
            }
        );
        assert_eq!(config.detection_threshold, 0.15);
        assert_eq!(config.fallback_fps, 30.0);
        assert!(config.max_candidates.is_none());
        assert!(!config.artifacts.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = SearchConfig::builder()
            .keyframe_policy(KeyframePolicy::histogram_change(0.5))
            .detection_threshold(0.3)
            .max_candidates(Some(10))
            .artifacts_dir("/tmp/frames")
            .artifact_format(ArtifactFormat::Png)
            .build()
            .unwrap();

        assert_eq!(config.keyframe_policy, KeyframePolicy::HistogramChange { threshold: 0.5 });
        assert_eq!(config.max_candidates, Some(10));
        assert!(config.artifacts.enabled);
        assert_eq!(config.artifacts.output_dir, PathBuf::from("/tmp/frames"));
        assert_eq!(config.artifacts.format.extension(), "png");
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        assert!(SearchConfig::builder().detection_threshold(1.5).build().is_err());
        assert!(SearchConfig::builder().detection_threshold(-0.1).build().is_err());
        assert!(SearchConfig::builder().fallback_fps(0.0).build().is_err());
        assert!(SearchConfig::builder().max_candidates(Some(0)).build().is_err());
        assert!(SearchConfig::builder()
            .keyframe_policy(KeyframePolicy::interval(0.0))
            .build()
            .is_err());
        assert!(SearchConfig::builder()
            .keyframe_policy(KeyframePolicy::interval(f64::INFINITY))
            .build()
            .is_err());
        assert!(SearchConfig::builder()
            .keyframe_policy(KeyframePolicy::histogram_change(1.2))
            .build()
            .is_err());

        let mut config = SearchConfig::default();
        config.artifacts.jpeg_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keyframe_policy_serde() {
        let json = serde_json::to_string(&KeyframePolicy::histogram_change(0.6)).unwrap();
        assert_eq!(json, r#"{"type":"histogram_change","threshold":0.6}"#);

        let policy: KeyframePolicy =
            serde_json::from_str(r#"{"type":"interval","interval_seconds":5.0}"#).unwrap();
        assert_eq!(policy, KeyframePolicy::interval(5.0));
    }

    #[test]
    fn test_from_json_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.json");
        std::fs::write(
            &path,
            r#"{"detection_threshold": 0.3, "artifacts": {"enabled": true, "format": "png"}}"#,
        )
        .unwrap();

        let config = SearchConfig::from_json_file(&path).unwrap();
        assert_eq!(config.detection_threshold, 0.3);
        assert_eq!(config.keyframe_policy, KeyframePolicy::default());
        assert!(config.artifacts.enabled);
        assert_eq!(config.artifacts.format, ArtifactFormat::Png);
        assert_eq!(config.artifacts.box_thickness, 2);
    }

    #[test]
    fn test_from_json_file_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.json");
        std::fs::write(&path, r#"{"detection_threshold": 7.0}"#).unwrap();
        assert!(matches!(
            SearchConfig::from_json_file(&path),
            Err(SearchError::InvalidConfig(_))
        ));

        assert!(SearchConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_execution_provider_serde() {
        for provider in [
            ExecutionProvider::Auto,
            ExecutionProvider::Cpu,
            ExecutionProvider::Cuda,
            ExecutionProvider::CoreMl,
        ] {
            let json = serde_json::to_string(&provider).unwrap();
            let back: ExecutionProvider = serde_json::from_str(&json).unwrap();
            assert_eq!(provider, back);
        }
        assert_eq!(ExecutionProvider::CoreMl.to_string(), "coreml");
    }

    #[test]
    fn test_detector_config_threads() {
        let config = DetectorConfig::default().with_threads(8);
        assert_eq!(config.intra_threads, 8);
        assert_eq!(config.inter_threads, 4);
        let config = DetectorConfig::default().with_threads(0);
        assert_eq!(config.inter_threads, 0);
    }
}
