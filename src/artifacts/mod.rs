//! Annotated frame artifacts
//!
//! For every candidate frame with at least one detection, a copy of the
//! frame with boxes and `label: confidence` captions burned in is written to
//! `output_dir/frame_{index:05}.{ext}`. These files are an audit trail, not
//! part of the search response.

mod font;

use crate::config::{ArtifactConfig, ArtifactFormat};
use crate::error::{Result, SearchError};
use crate::types::Detection;
use crate::video::Frame;
use image::{codecs::jpeg::JpegEncoder, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Caption glyph scale
const CAPTION_SCALE: u32 = 2;
/// Caption baseline offset above the box
const CAPTION_OFFSET: f32 = 10.0;
/// Lowest caption baseline, keeps captions of boxes at the top edge visible
const MIN_CAPTION_BASELINE: f32 = 20.0;

/// File name of the artifact for `frame_index`
#[must_use]
pub fn artifact_file_name(frame_index: u64, format: ArtifactFormat) -> String {
    format!("frame_{frame_index:05}.{}", format.extension())
}

/// Writes annotated frames
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    config: ArtifactConfig,
}

impl ArtifactWriter {
    #[must_use]
    pub fn new(config: ArtifactConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ArtifactConfig {
        &self.config
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Output path for `frame_index`
    #[must_use]
    pub fn path_for(&self, frame_index: u64) -> PathBuf {
        self.config
            .output_dir
            .join(artifact_file_name(frame_index, self.config.format))
    }

    /// Draw boxes and captions on a copy of the frame
    #[must_use]
    pub fn annotate(&self, frame: &Frame, detections: &[Detection]) -> RgbImage {
        let mut canvas = frame.image.clone();
        let color = Rgb(self.config.box_color);

        for detection in detections {
            let bbox = detection.bbox.clip(canvas.width(), canvas.height());
            let x = bbox.x1.round() as i32;
            let y = bbox.y1.round() as i32;
            let width = bbox.width().round() as u32;
            let height = bbox.height().round() as u32;

            for inset in 0..self.config.box_thickness {
                let w = width.saturating_sub(2 * inset);
                let h = height.saturating_sub(2 * inset);
                if w == 0 || h == 0 {
                    break;
                }
                let offset = inset as i32;
                draw_hollow_rect_mut(&mut canvas, Rect::at(x + offset, y + offset).of_size(w, h), color);
            }

            let caption = format!("{}: {:.2}", detection.label, detection.confidence);
            let baseline = (bbox.y1 - CAPTION_OFFSET).max(MIN_CAPTION_BASELINE);
            let max_x = i64::from(canvas.width()) - i64::from(font::text_width(&caption, CAPTION_SCALE));
            let caption_x = i64::from(x).min(max_x).max(0);
            font::draw_text(
                &mut canvas,
                caption_x,
                baseline.round() as i64,
                &caption,
                color,
                CAPTION_SCALE,
            );
        }

        canvas
    }

    /// Annotate and save the frame, creating the output directory if needed
    ///
    /// # Errors
    /// - [`SearchError::ArtifactWrite`] for any directory, encoding or I/O failure
    pub fn write(&self, frame: &Frame, detections: &[Detection]) -> Result<PathBuf> {
        let path = self.path_for(frame.index);
        fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| SearchError::artifact_write(&self.config.output_dir, e.to_string()))?;

        let annotated = self.annotate(frame, detections);
        self.save(&annotated, &path)
            .map_err(|e| SearchError::artifact_write(&path, e.to_string()))?;

        log::debug!(
            "Saved annotated frame {} with {} detections to {}",
            frame.index,
            detections.len(),
            path.display()
        );
        Ok(path)
    }

    fn save(&self, image: &RgbImage, path: &Path) -> Result<()> {
        match self.config.format {
            ArtifactFormat::Jpeg => {
                let file = fs::File::create(path)?;
                let mut writer = BufWriter::new(file);
                let encoder = JpegEncoder::new_with_quality(&mut writer, self.config.jpeg_quality);
                image.write_with_encoder(encoder)?;
            },
            ArtifactFormat::Png => image.save_with_format(path, ImageFormat::Png)?,
        }
        Ok(())
    }
}
