//! FFmpeg video source
//!
//! Decodes containers through the ffmpeg-next bindings. Each handle owns its
//! demuxer, decoder and a lazily built RGB24 scaler; frames are decoded on
//! demand, one packet at a time, so memory stays bounded regardless of video
//! length.

use crate::error::{Result, SearchError};
use crate::video::{effective_fps, Frame, VideoHandle, VideoInfo, VideoSource, DEFAULT_FPS};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::Path;

/// Video source backed by FFmpeg
#[derive(Debug, Clone)]
pub struct FfmpegVideoSource {
    fallback_fps: f64,
}

impl FfmpegVideoSource {
    /// Create a source that assumes 30 fps when the container reports none
    #[must_use]
    pub fn new() -> Self {
        Self {
            fallback_fps: DEFAULT_FPS,
        }
    }

    /// Override the frame rate assumed for containers without a usable one
    #[must_use]
    pub fn with_fallback_fps(mut self, fps: f64) -> Self {
        self.fallback_fps = effective_fps(fps, DEFAULT_FPS);
        self
    }
}

impl Default for FfmpegVideoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSource for FfmpegVideoSource {
    fn open(&self, location: &Path) -> Result<Box<dyn VideoHandle>> {
        let handle = FfmpegHandle::open(location, self.fallback_fps)?;
        Ok(Box::new(handle))
    }
}

struct FfmpegHandle {
    info: VideoInfo,
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    scaler: Option<ffmpeg::software::scaling::Context>,
    next_index: u64,
    eof_sent: bool,
    finished: bool,
}

impl FfmpegHandle {
    fn open(location: &Path, fallback_fps: f64) -> Result<Self> {
        let display = location.display().to_string();

        if !location.exists() {
            return Err(SearchError::video_unavailable(&display, "file does not exist"));
        }

        ffmpeg::init().map_err(|e| {
            SearchError::video_unavailable(&display, format!("failed to initialize FFmpeg: {e}"))
        })?;

        let input = ffmpeg::format::input(&location).map_err(|e| {
            SearchError::video_unavailable(&display, format!("failed to open container: {e}"))
        })?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| SearchError::video_unavailable(&display, "no video stream found"))?;
        let stream_index = stream.index();
        let reported_fps = f64::from(stream.avg_frame_rate());
        let total_frames = u64::try_from(stream.frames()).ok().filter(|n| *n > 0);

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|e| {
                SearchError::video_unavailable(&display, format!("failed to create decoder: {e}"))
            })?;

        let fps = effective_fps(reported_fps, fallback_fps);
        if (fps - reported_fps).abs() > f64::EPSILON {
            log::warn!(
                "Video {} reports frame rate {:.3}, assuming {:.3} fps",
                display,
                reported_fps,
                fps
            );
        }

        let info = VideoInfo {
            location: display,
            fps,
            width: decoder.width(),
            height: decoder.height(),
            total_frames,
            codec: Some(decoder.id().name().to_string()),
        };

        log::info!(
            "Opened video {} ({}x{} @ {:.2} fps, codec {})",
            info.location,
            info.width,
            info.height,
            info.fps,
            info.codec.as_deref().unwrap_or("unknown")
        );

        Ok(Self {
            info,
            input,
            decoder,
            stream_index,
            scaler: None,
            next_index: 0,
            eof_sent: false,
            finished: false,
        })
    }

    fn fail(&mut self, reason: String) -> Option<Result<Frame>> {
        self.finished = true;
        Some(Err(SearchError::frame_decode(self.next_index, reason)))
    }

    fn convert(&mut self, decoded: &ffmpeg::util::frame::video::Video) -> Result<Frame> {
        let width = decoded.width();
        let height = decoded.height();

        if self.scaler.is_none() {
            let scaler = ffmpeg::software::scaling::Context::get(
                decoded.format(),
                width,
                height,
                ffmpeg::format::Pixel::RGB24,
                width,
                height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| {
                SearchError::frame_decode(self.next_index, format!("failed to create scaler: {e}"))
            })?;
            self.scaler = Some(scaler);
        }

        let mut rgb = ffmpeg::util::frame::video::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(decoded, &mut rgb).map_err(|e| {
                SearchError::frame_decode(self.next_index, format!("RGB conversion failed: {e}"))
            })?;
        }

        let data = rgb.data(0);
        let stride = rgb.stride(0);
        let row_bytes = width as usize * 3;
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in data.chunks(stride).take(height as usize) {
            let Some(row) = row.get(..row_bytes) else {
                return Err(SearchError::frame_decode(
                    self.next_index,
                    "decoded row shorter than frame width",
                ));
            };
            pixels.extend_from_slice(row);
        }

        let image = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
            SearchError::frame_decode(self.next_index, "decoded buffer size mismatch")
        })?;

        let frame = Frame::new(image, self.next_index, self.info.fps);
        self.next_index += 1;
        Ok(frame)
    }
}

impl VideoHandle for FfmpegHandle {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            if self.finished {
                return None;
            }

            let mut decoded = ffmpeg::util::frame::video::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let converted = self.convert(&decoded);
                    if converted.is_err() {
                        self.finished = true;
                    }
                    return Some(converted);
                },
                Err(ffmpeg::Error::Eof) => {
                    self.finished = true;
                    return None;
                },
                Err(ffmpeg::Error::Other {
                    errno: ffmpeg::error::EAGAIN,
                }) => {},
                Err(e) => return self.fail(format!("decoder error: {e}")),
            }

            if self.eof_sent {
                self.finished = true;
                return None;
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        return self.fail(format!("failed to send packet to decoder: {e}"));
                    }
                },
                Err(ffmpeg::Error::Eof) => {
                    if let Err(e) = self.decoder.send_eof() {
                        return self.fail(format!("failed to flush decoder: {e}"));
                    }
                    self.eof_sent = true;
                },
                Err(e) => return self.fail(format!("failed to read packet: {e}")),
            }
        }
    }
}

impl Drop for FfmpegHandle {
    fn drop(&mut self) {
        log::debug!(
            "Closed video {} after {} decoded frames",
            self.info.location,
            self.next_index
        );
    }
}
