//! Progress reporting service
//!
//! Separates progress reporting from the search pipeline so each frontend
//! can render it its own way: logs, a terminal progress bar or nothing.

use instant::Instant;

/// Stages of one search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStage {
    /// Opening the video container
    Opening,
    /// Decoding frames and selecting keyframes
    Sampling,
    /// Running the detector on a candidate frame
    Detecting,
    /// Collecting results after the last candidate
    Aggregating,
    /// Video released, results available
    Closed,
    /// The video could not be opened
    Failed,
}

impl SearchStage {
    /// Get a human-readable description of the stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            SearchStage::Opening => "Opening video",
            SearchStage::Sampling => "Sampling keyframes",
            SearchStage::Detecting => "Detecting query in keyframes",
            SearchStage::Aggregating => "Aggregating detections",
            SearchStage::Closed => "Search completed",
            SearchStage::Failed => "Search failed",
        }
    }

    /// Nominal completion percentage when entering the stage
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            SearchStage::Opening => 0,
            SearchStage::Sampling => 5,
            SearchStage::Detecting => 10,
            SearchStage::Aggregating => 95,
            SearchStage::Closed | SearchStage::Failed => 100,
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub stage: SearchStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since the search started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: SearchStage, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }

    /// Create a progress update with custom description
    #[must_use]
    pub fn with_description(stage: SearchStage, description: String, start_time: Instant) -> Self {
        Self {
            description,
            ..Self::new(stage, start_time)
        }
    }
}

/// Update sent after each candidate frame
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateProgress {
    pub frame_index: u64,
    pub timestamp: f64,
    /// Candidates processed so far, including this one
    pub candidates_processed: u64,
    /// Detections kept so far
    pub detections_found: usize,
    /// Frame count reported by the container, if known
    pub total_frames: Option<u64>,
}

/// Final counters of a search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSummary {
    pub candidates_processed: u64,
    pub frames_decoded: u64,
    pub detections: usize,
    pub warnings: usize,
    pub elapsed_ms: u64,
}

/// Trait for reporting progress during a search
pub trait ProgressReporter: Send + Sync {
    /// Report a stage transition
    fn report_progress(&self, update: ProgressUpdate);

    /// Report one processed candidate
    fn report_candidate(&self, update: CandidateProgress) {
        drop(update);
    }

    /// Report search completion
    fn report_completion(&self, summary: &SearchSummary);

    /// Report an error
    fn report_error(&self, stage: SearchStage, error: &str);
}

/// No-op progress reporter that discards all progress updates
#[derive(Debug, Default)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _summary: &SearchSummary) {}

    fn report_error(&self, _stage: SearchStage, _error: &str) {}
}

/// Console progress reporter that logs progress
#[derive(Debug)]
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// `verbose` adds timings and per-candidate lines
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_candidate(&self, update: CandidateProgress) {
        if self.verbose {
            log::info!(
                "Candidate {} at frame {} ({:.2}s): {} detections so far",
                update.candidates_processed,
                update.frame_index,
                update.timestamp,
                update.detections_found
            );
        }
    }

    fn report_completion(&self, summary: &SearchSummary) {
        log::info!(
            "Search completed in {}ms: {} detections in {} keyframes",
            summary.elapsed_ms,
            summary.detections,
            summary.candidates_processed
        );
        if self.verbose {
            log::info!("  - Frames decoded: {}", summary.frames_decoded);
            log::info!("  - Warnings: {}", summary.warnings);
        }
    }

    fn report_error(&self, stage: SearchStage, error: &str) {
        log::error!("Error during {}: {}", stage.description(), error);
    }
}

/// Terminal progress bar over the decoded frames
#[cfg(feature = "cli")]
pub struct IndicatifProgressReporter {
    bar: indicatif::ProgressBar,
}

#[cfg(feature = "cli")]
impl IndicatifProgressReporter {
    #[must_use]
    pub fn new() -> Self {
        let bar = indicatif::ProgressBar::new_spinner();
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Self { bar }
    }
}

#[cfg(feature = "cli")]
impl Default for IndicatifProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "cli")]
impl ProgressReporter for IndicatifProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.bar.set_message(update.description);
    }

    fn report_candidate(&self, update: CandidateProgress) {
        if let Some(total) = update.total_frames {
            if self.bar.length() != Some(total) {
                self.bar.set_length(total);
                if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames {msg}",
                ) {
                    self.bar.set_style(style.progress_chars("#>-"));
                }
            }
        }
        self.bar.set_position(update.frame_index);
        self.bar.set_message(format!(
            "{} keyframes, {} detections",
            update.candidates_processed, update.detections_found
        ));
    }

    fn report_completion(&self, summary: &SearchSummary) {
        self.bar.finish_with_message(format!(
            "{} detections in {} keyframes ({}ms)",
            summary.detections, summary.candidates_processed, summary.elapsed_ms
        ));
    }

    fn report_error(&self, stage: SearchStage, error: &str) {
        self.bar
            .abandon_with_message(format!("{}: {error}", stage.description()));
    }
}

/// Tracks timing and the current stage of one search
pub struct ProgressTracker<'a> {
    reporter: &'a dyn ProgressReporter,
    start_time: Instant,
    current_stage: Option<SearchStage>,
}

impl<'a> ProgressTracker<'a> {
    #[must_use]
    pub fn new(reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    /// Report a stage transition; repeated reports of the same stage are dropped
    pub fn report_stage(&mut self, stage: SearchStage) {
        if self.current_stage == Some(stage) {
            return;
        }
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    pub fn report_candidate(&self, update: CandidateProgress) {
        self.reporter.report_candidate(update);
    }

    pub fn report_completion(&mut self, summary: &SearchSummary) {
        self.report_stage(SearchStage::Closed);
        self.reporter.report_completion(summary);
    }

    pub fn report_error(&mut self, error: &str) {
        let stage = self.current_stage.unwrap_or(SearchStage::Opening);
        self.reporter.report_error(stage, error);
        self.current_stage = Some(SearchStage::Failed);
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<SearchStage> {
        self.current_stage
    }
}

/// Pick the reporter for the CLI flags
#[cfg(feature = "cli")]
#[must_use]
pub fn create_cli_progress_reporter(enable_progress: bool, verbose: bool) -> Box<dyn ProgressReporter> {
    if enable_progress {
        Box::new(IndicatifProgressReporter::new())
    } else {
        Box::new(ConsoleProgressReporter::new(verbose))
    }
}
