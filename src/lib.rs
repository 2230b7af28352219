#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Evidence Visual Search Library
//!
//! Finds objects described in free text ("a red backpack", "a person with a
//! dog") inside video files and reports each detection with its frame index,
//! timestamp, confidence and bounding box.
//!
//! A search streams decoded frames through a keyframe selector, sends every
//! selected frame to a zero-shot detector and aggregates the results in
//! frame order. Only a video that cannot be opened fails a search; decode,
//! detection and artifact errors are absorbed into warnings.
//!
//! ## Features
//!
//! - **Keyframe Policies**: fixed time interval or histogram change
//! - **Zero-Shot Detection**: OWLv2 on ONNX Runtime with CUDA, `CoreML` and CPU providers
//! - **Streaming**: frames are decoded lazily; candidates go straight to inference
//! - **Audit Artifacts**: optional annotated frames with boxes and confidence captions
//! - **Model Management**: automatic downloading and caching of models from `HuggingFace`
//! - **Remote Videos**: http(s) references are fetched to a temporary file
//! - **CLI Integration**: optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use evidence_vsearch::{
//!     DetectorConfig, ExecutionProvider, KeyframePolicy, ModelSpec, SearchConfig,
//!     SearchOrchestrator, ZeroShotDetector,
//! };
//! use evidence_vsearch::video::FfmpegVideoSource;
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! let detector = ZeroShotDetector::from_config(
//!     &DetectorConfig::new(ModelSpec::default()).with_execution_provider(ExecutionProvider::Auto),
//! )?;
//! let config = SearchConfig::builder()
//!     .keyframe_policy(KeyframePolicy::interval(5.0))
//!     .build()?;
//!
//! let mut orchestrator =
//!     SearchOrchestrator::new(config, Box::new(FfmpegVideoSource::new()), Box::new(detector))?;
//! let outcome = orchestrator.search(Path::new("camera-3.mp4"), "a red backpack")?;
//! for detection in &outcome.detections {
//!     println!("{:.1}s {:.2} {:?}", detection.timestamp, detection.confidence, detection.bounding_box);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): OWLv2 detector on ONNX Runtime
//! - `video-support` (default): video decoding through FFmpeg
//! - `cli` (default): command-line interface and progress reporting
//! - `tracing-json`, `tracing-files`: extra log formats and file output for the CLI
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! evidence-vsearch = { version = "0.1", default-features = false, features = ["onnx", "video-support"] }
//! ```

pub mod api;
pub mod artifacts;
pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod detector;
pub mod download;
pub mod error;
pub mod inference;
pub mod keyframe;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod tracing_config;
pub mod types;
pub mod utils;
pub mod video;

// Public API exports
pub use api::VisualSearchService;
pub use artifacts::ArtifactWriter;
pub use backends::*;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{
    ArtifactConfig, ArtifactFormat, DetectorConfig, ExecutionProvider, KeyframePolicy,
    SearchConfig, SearchConfigBuilder,
};
pub use detector::{Detector, ZeroShotDetector};
pub use download::{HttpVideoFetcher, ModelDownloader, RemoteFetcher};
pub use error::{Result, SearchError};
pub use inference::{InferenceBackend, RawDetection};
pub use keyframe::{HistogramChangeSelector, IntervalSelector, KeyframeSelector};
pub use models::{ModelManager, ModelSource, ModelSpec};
pub use orchestrator::{SearchOrchestrator, SearchState};
pub use services::{
    ConsoleProgressReporter, NoOpProgressReporter, ProgressReporter, ProgressTracker,
    ProgressUpdate, SearchStage,
};
pub use tracing_config::{events, spans, TracingConfig, TracingFormat, TracingOutput};
#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingGuard};
pub use types::{
    BoundingBox, Detection, DetectionResult, SearchOutcome, SearchRequest, SearchResponse,
    SearchWarning, WarningKind,
};
pub use video::{Frame, VideoHandle, VideoInfo, VideoSource};

/// Search a local video file with FFmpeg decoding
///
/// Convenience wrapper for one-off searches; the detector is shut down
/// afterwards. Use [`SearchOrchestrator`] directly to reuse a loaded detector.
///
/// # Examples
/// ```rust,no_run
/// use evidence_vsearch::{search_video, DetectorConfig, SearchConfig, ZeroShotDetector};
///
/// # fn example() -> anyhow::Result<()> {
/// let detector = ZeroShotDetector::from_config(&DetectorConfig::default())?;
/// let outcome = search_video("lobby.mp4", "a person with a dog", &SearchConfig::default(), Box::new(detector))?;
/// println!("{} detections", outcome.detections.len());
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "video-support")]
pub fn search_video<P: AsRef<std::path::Path>>(
    path: P,
    query: &str,
    config: &SearchConfig,
    detector: Box<dyn Detector>,
) -> Result<SearchOutcome> {
    let source = video::FfmpegVideoSource::new().with_fallback_fps(config.fallback_fps);
    let mut orchestrator = SearchOrchestrator::new(config.clone(), Box::new(source), detector)?;
    let outcome = orchestrator.search(path.as_ref(), query);
    orchestrator.shutdown();
    outcome
}
