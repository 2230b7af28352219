//! Keyframe selection
//!
//! Reduces a full frame stream to the subset worth sending to the detector.
//! Two strategies implement [`KeyframeSelector`]:
//!
//! - [`IntervalSelector`] keeps the first frame of every fixed-length window
//! - [`HistogramChangeSelector`] keeps frames whose grayscale histogram
//!   departs from the last kept frame
//!
//! Both are single-pass and keep the input order, so the selected frames are
//! always a subsequence of the decoded stream.

pub mod histogram;
pub mod interval;

pub use histogram::{GrayHistogram, HistogramChangeSelector};
pub use interval::IntervalSelector;

use crate::config::KeyframePolicy;
use crate::video::Frame;

/// Streaming keyframe policy
pub trait KeyframeSelector: Send {
    /// Decide whether `frame` becomes a detection candidate
    ///
    /// Frames must be fed in stream order.
    fn should_select(&mut self, frame: &Frame) -> bool;

    /// Short policy name for logs
    fn name(&self) -> &'static str;

    /// Forget all state so the selector can run over a new stream
    fn reset(&mut self);
}

/// Build the selector for `policy` on a video running at `fps`
#[must_use]
pub fn selector_for(policy: &KeyframePolicy, fps: f64) -> Box<dyn KeyframeSelector> {
    match *policy {
        KeyframePolicy::Interval { interval_seconds } => {
            Box::new(IntervalSelector::new(fps, interval_seconds))
        },
        KeyframePolicy::HistogramChange { threshold } => {
            Box::new(HistogramChangeSelector::new(threshold))
        },
    }
}

/// Lazily filter `frames` down to the keyframes chosen by `selector`
pub fn select_keyframes<'s, I>(
    frames: I,
    selector: &'s mut dyn KeyframeSelector,
) -> impl Iterator<Item = Frame> + 's
where
    I: Iterator<Item = Frame> + 's,
{
    frames.filter(move |frame| selector.should_select(frame))
}
