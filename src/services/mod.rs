//! Services separating frontend concerns from the search pipeline

pub mod progress;

#[cfg(feature = "cli")]
pub use progress::{create_cli_progress_reporter, IndicatifProgressReporter};
pub use progress::{
    CandidateProgress, ConsoleProgressReporter, NoOpProgressReporter, ProgressReporter,
    ProgressTracker, ProgressUpdate, SearchStage, SearchSummary,
};
