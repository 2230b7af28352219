//! Keyframe selection and timestamp properties

mod common;

use common::{memory_source, uniform_frames};
use evidence_vsearch::keyframe::interval::frames_per_interval;
use evidence_vsearch::keyframe::{select_keyframes, GrayHistogram};
use evidence_vsearch::video::{self, frame_timestamp};
use evidence_vsearch::{
    Frame, HistogramChangeSelector, IntervalSelector, KeyframePolicy, KeyframeSelector, Result,
    VideoSource,
};
use image::{Rgb, RgbImage};
use std::path::Path;

fn frame(index: u64, fps: f64, level: u8) -> Frame {
    Frame::new(RgbImage::from_pixel(8, 8, Rgb([level, level, level])), index, fps)
}

fn selected<S: KeyframeSelector>(mut selector: S, frames: Vec<Frame>) -> Vec<u64> {
    select_keyframes(frames.into_iter(), &mut selector)
        .map(|f| f.index)
        .collect()
}

#[test]
fn test_timestamps_follow_frame_rate() -> Result<()> {
    let source = memory_source("clip.mp4", 25.0, uniform_frames(60, (4, 4), 0));
    let mut handle = source.open(Path::new("clip.mp4"))?;

    for frame in video::frames(handle.as_mut()) {
        assert!((frame.timestamp - frame.index as f64 / 25.0).abs() < 1e-12);
    }
    assert!((frame_timestamp(1798, 29.97) - 60.0).abs() < 0.01);
    Ok(())
}

#[test]
fn test_frames_are_strictly_increasing() -> Result<()> {
    let source = memory_source("clip.mp4", 30.0, uniform_frames(45, (4, 4), 0));
    let mut handle = source.open(Path::new("clip.mp4"))?;

    let indices: Vec<u64> = video::frames(handle.as_mut()).map(|f| f.index).collect();
    assert_eq!(indices, (0..45).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_interval_selects_first_frame_of_each_window() {
    let frames: Vec<Frame> = (0..100).map(|i| frame(i, 30.0, 0)).collect();
    assert_eq!(selected(IntervalSelector::new(30.0, 1.0), frames), vec![0, 30, 60, 90]);
}

#[test]
fn test_interval_window_rounding() {
    assert_eq!(frames_per_interval(29.97, 60.0), 1798);
    assert_eq!(frames_per_interval(30.0, 60.0), 1800);
    // Windows shorter than a frame select every frame
    assert_eq!(frames_per_interval(30.0, 0.01), 1);

    let frames: Vec<Frame> = (0..5).map(|i| frame(i, 30.0, 0)).collect();
    assert_eq!(selected(IntervalSelector::new(30.0, 0.01), frames), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_minute_interval_emits_multiples_of_1800() {
    let frames: Vec<Frame> = (0..5401).map(|i| frame(i, 30.0, 0)).collect();
    assert_eq!(
        selected(IntervalSelector::new(30.0, 60.0), frames),
        vec![0, 1800, 3600, 5400]
    );
}

#[test]
fn test_short_video_yields_only_first_frame() {
    let frames: Vec<Frame> = (0..10).map(|i| frame(i, 30.0, 0)).collect();
    assert_eq!(selected(IntervalSelector::new(30.0, 60.0), frames), vec![0]);
}

#[test]
fn test_histogram_selects_cuts_against_last_keyframe() {
    let levels = [0u8, 0, 0, 255, 255, 255, 0, 0, 128, 128];
    let frames: Vec<Frame> = levels
        .iter()
        .enumerate()
        .map(|(i, &level)| frame(i as u64, 30.0, level))
        .collect();

    assert_eq!(selected(HistogramChangeSelector::new(0.6), frames), vec![0, 3, 6, 8]);
}

#[test]
fn test_histogram_static_video_yields_first_frame() {
    let frames: Vec<Frame> = (0..50).map(|i| frame(i, 30.0, 77)).collect();
    assert_eq!(selected(HistogramChangeSelector::new(0.6), frames), vec![0]);
}

#[test]
fn test_histogram_threshold_extremes() {
    let frames = || -> Vec<Frame> { (0..6).map(|i| frame(i, 30.0, (i * 40) as u8)).collect() };

    // Correlation is never below -1: only the first frame
    assert_eq!(selected(HistogramChangeSelector::new(-1.0), frames()), vec![0]);
    // Distinct frames all fall below 1
    assert_eq!(selected(HistogramChangeSelector::new(1.0), frames()), vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_correlation_is_symmetric_and_bounded() {
    let mut mixed = RgbImage::from_pixel(16, 16, Rgb([10, 10, 10]));
    for x in 0..8 {
        for y in 0..16 {
            mixed.put_pixel(x, y, Rgb([200, 200, 200]));
        }
    }
    let a = GrayHistogram::from_image(&mixed);
    let b = GrayHistogram::from_image(&RgbImage::from_pixel(16, 16, Rgb([200, 200, 200])));

    let ab = a.correlation(&b);
    assert!((ab - b.correlation(&a)).abs() < 1e-12);
    assert!((-1.0..=1.0).contains(&ab));
    assert!((a.correlation(&a) - 1.0).abs() < 1e-9);
}

#[test]
fn test_reset_restarts_selection() {
    let mut selector = KeyframePolicy::interval(1.0).selector(10.0);
    let first: Vec<bool> = (0..3).map(|i| selector.should_select(&frame(i, 10.0, 0))).collect();
    selector.reset();
    assert!(selector.should_select(&frame(0, 10.0, 0)));
    assert_eq!(first, vec![true, false, false]);
}
