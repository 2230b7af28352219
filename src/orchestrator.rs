//! End-to-end visual search over one video
//!
//! The orchestrator opens the video, streams decoded frames through the
//! configured keyframe selector, sends each candidate to the detector and
//! folds the per-candidate outcomes into one [`SearchOutcome`]. Only a video
//! that cannot be opened fails the search; decode, detection and artifact
//! errors become warnings on the outcome.

use crate::artifacts::ArtifactWriter;
use crate::config::SearchConfig;
use crate::detector::Detector;
use crate::error::{Result, SearchError};
use crate::services::progress::{
    CandidateProgress, NoOpProgressReporter, ProgressReporter, ProgressTracker, SearchStage,
    SearchSummary,
};
use crate::tracing_config::{events, spans};
use crate::types::{Detection, DetectionResult, SearchOutcome, SearchWarning, WarningKind};
use crate::video::{self, Frame, VideoSource};
use instant::Instant;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Lifecycle of one search
///
/// `Opened -> Sampling -> (Detecting per candidate)* -> Aggregated -> Closed`,
/// or `Failed` when the video cannot be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    /// No search has run yet
    Idle,
    Opened,
    Sampling,
    Detecting,
    Aggregated,
    Closed,
    Failed,
}

/// Self-contained result of one candidate frame
#[derive(Debug, Default)]
struct CandidateOutcome {
    results: Vec<DetectionResult>,
    artifact: Option<PathBuf>,
    warnings: Vec<SearchWarning>,
}

/// Running totals of a search
#[derive(Debug, Default)]
struct Accumulator {
    detections: Vec<DetectionResult>,
    artifacts: Vec<PathBuf>,
    warnings: Vec<SearchWarning>,
    candidates: u64,
    cancelled: bool,
}

impl Accumulator {
    fn merge(mut self, outcome: CandidateOutcome) -> Self {
        self.candidates += 1;
        self.detections.extend(outcome.results);
        self.artifacts.extend(outcome.artifact);
        self.warnings.extend(outcome.warnings);
        self
    }

    fn warn(&mut self, warning: SearchWarning) {
        events::absorbed(&warning);
        self.warnings.push(warning);
    }
}

/// Runs searches with one injected video source and detector
///
/// The detector is loaded once by the caller and reused by every search;
/// call [`SearchOrchestrator::shutdown`] to release it.
pub struct SearchOrchestrator {
    config: SearchConfig,
    source: Box<dyn VideoSource>,
    detector: Box<dyn Detector>,
    artifacts: ArtifactWriter,
    reporter: Box<dyn ProgressReporter>,
    state: SearchState,
}

impl SearchOrchestrator {
    /// Create an orchestrator
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(
        config: SearchConfig,
        source: Box<dyn VideoSource>,
        detector: Box<dyn Detector>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            artifacts: ArtifactWriter::new(config.artifacts.clone()),
            config,
            source,
            detector,
            reporter: Box::new(NoOpProgressReporter),
            state: SearchState::Idle,
        })
    }

    /// Report progress to `reporter`
    #[must_use]
    pub fn with_progress_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// State reached by the most recent search
    #[must_use]
    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Release the detector
    pub fn shutdown(mut self) {
        log::debug!("Shutting down detector {}", self.detector.name());
        self.detector.shutdown();
    }

    /// Search `location` for `query`
    ///
    /// # Errors
    /// - [`SearchError::VideoUnavailable`] when the video cannot be opened
    pub fn search(&mut self, location: &Path, query: &str) -> Result<SearchOutcome> {
        self.search_with_cancellation(location, query, &CancellationToken::new())
    }

    /// Search, stopping early once `cancel` fires
    ///
    /// Cancellation is checked before each decoded frame; a cancelled search
    /// still returns everything gathered so far with a `Cancelled` warning.
    ///
    /// # Errors
    /// - [`SearchError::VideoUnavailable`] when the video cannot be opened
    pub fn search_with_cancellation(
        &mut self,
        location: &Path,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome> {
        let start = Instant::now();
        let location_display = location.display().to_string();
        let span = spans::search(query, &location_display, &self.config.keyframe_policy.to_string());
        let _entered = span.enter();
        let mut tracker = ProgressTracker::new(self.reporter.as_ref());

        tracker.report_stage(SearchStage::Opening);
        let mut handle = match self.source.open(location) {
            Ok(handle) => handle,
            Err(e) => {
                let e = match e {
                    SearchError::VideoUnavailable { .. } => e,
                    other => SearchError::video_unavailable(&location_display, other.to_string()),
                };
                log::error!("Cannot open video: {e}");
                tracker.report_error(&e.to_string());
                self.state = SearchState::Failed;
                return Err(e);
            },
        };
        self.state = SearchState::Opened;

        let info = handle.info().clone();
        let mut selector = self.config.keyframe_policy.selector(info.fps);
        log::info!(
            "Searching '{}' for '{}' ({}x{} at {:.2} fps, {} policy)",
            location_display,
            query,
            info.width,
            info.height,
            info.fps,
            selector.name()
        );

        self.state = SearchState::Sampling;
        tracker.report_stage(SearchStage::Sampling);

        let threshold = self.config.detection_threshold;
        let mut acc = Accumulator::default();
        let mut frames = video::frames(handle.as_mut());

        for frame in frames.by_ref() {
            if cancel.is_cancelled() {
                acc.cancelled = true;
                break;
            }
            if !selector.should_select(&frame) {
                continue;
            }

            self.state = SearchState::Detecting;
            tracker.report_stage(SearchStage::Detecting);

            let outcome =
                process_candidate(self.detector.as_mut(), &self.artifacts, &frame, query, threshold);
            for warning in &outcome.warnings {
                events::absorbed(warning);
            }
            acc = acc.merge(outcome);

            tracker.report_candidate(CandidateProgress {
                frame_index: frame.index,
                timestamp: frame.timestamp,
                candidates_processed: acc.candidates,
                detections_found: acc.detections.len(),
                total_frames: info.total_frames,
            });

            if self
                .config
                .max_candidates
                .is_some_and(|max| acc.candidates >= max)
            {
                log::info!("Candidate limit of {} reached", acc.candidates);
                break;
            }
        }

        if let Some(error) = frames.take_error() {
            acc.warn(SearchWarning::new(
                WarningKind::FrameDecode,
                error.frame_index(),
                error.to_string(),
            ));
        }
        if acc.cancelled {
            acc.warn(SearchWarning::new(
                WarningKind::Cancelled,
                None,
                format!("Search cancelled after {} candidates", acc.candidates),
            ));
        }
        let frames_decoded = frames.stats().frames_decoded;

        self.state = SearchState::Aggregated;
        tracker.report_stage(SearchStage::Aggregating);

        drop(frames);
        drop(handle);
        self.state = SearchState::Closed;

        let elapsed = start.elapsed();
        tracker.report_completion(&SearchSummary {
            candidates_processed: acc.candidates,
            frames_decoded,
            detections: acc.detections.len(),
            warnings: acc.warnings.len(),
            elapsed_ms: elapsed.as_millis() as u64,
        });
        events::performance_metric("search", elapsed.as_millis() as u64);
        log::info!(
            "Found {} detections in {} keyframes of {} frames ({:.2}s)",
            acc.detections.len(),
            acc.candidates,
            frames_decoded,
            elapsed.as_secs_f64()
        );

        Ok(SearchOutcome {
            query: query.to_string(),
            detections: acc.detections,
            frames_processed: acc.candidates,
            frames_decoded,
            elapsed,
            warnings: acc.warnings,
            cancelled: acc.cancelled,
            artifacts: acc.artifacts,
            video: info,
        })
    }
}

impl std::fmt::Debug for SearchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchOrchestrator")
            .field("config", &self.config)
            .field("detector", &self.detector.name())
            .field("state", &self.state)
            .finish()
    }
}

/// Detect, validate and annotate one candidate
fn process_candidate(
    detector: &mut dyn Detector,
    artifacts: &ArtifactWriter,
    frame: &Frame,
    query: &str,
    threshold: f32,
) -> CandidateOutcome {
    let span = spans::candidate(frame.index, frame.timestamp);
    let _entered = span.enter();

    let detections = match detector.detect(frame, query, threshold) {
        Ok(detections) => validate_detections(detections, frame, threshold),
        Err(e) => {
            return CandidateOutcome {
                warnings: vec![SearchWarning::new(
                    WarningKind::DetectionFailed,
                    Some(frame.index),
                    e.to_string(),
                )],
                ..CandidateOutcome::default()
            };
        },
    };

    if detections.is_empty() {
        return CandidateOutcome::default();
    }
    tracing::debug!(count = detections.len(), "Query found in frame");

    let mut outcome = CandidateOutcome::default();
    if artifacts.is_enabled() {
        match artifacts.write(frame, &detections) {
            Ok(path) => outcome.artifact = Some(path),
            Err(e) => outcome.warnings.push(SearchWarning::new(
                WarningKind::ArtifactWrite,
                Some(frame.index),
                e.to_string(),
            )),
        }
    }

    outcome.results = detections
        .into_iter()
        .map(|detection| DetectionResult::from_detection(detection, frame.index, frame.timestamp))
        .collect();
    outcome
}

/// Enforce the result invariants on detector output
///
/// Drops detections below the threshold or with non-finite confidence, clips
/// boxes to the frame and drops boxes left empty.
fn validate_detections(detections: Vec<Detection>, frame: &Frame, threshold: f32) -> Vec<Detection> {
    let (width, height) = frame.dimensions();
    detections
        .into_iter()
        .filter(|d| d.confidence.is_finite() && d.confidence >= threshold)
        .filter_map(|mut d| {
            d.bbox = d.bbox.clip(width, height);
            d.confidence = d.confidence.min(1.0);
            d.bbox.is_valid().then_some(d)
        })
        .collect()
}
