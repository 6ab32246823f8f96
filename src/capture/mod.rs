/// The `capture` module turns an uploaded video into still frames.
/// `sampler` owns the timing loop; `ffmpeg` is the production decoder.
pub mod ffmpeg;
pub mod sampler;

pub use sampler::{frame_count, sample_frames, DecoderFactory, MediaDecoder, SamplerConfig};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use std::sync::Arc;

use crate::error::InputError;

/// An uploaded video. Cheap to clone; replaced wholesale on a new upload.
#[derive(Debug, Clone)]
pub struct VideoSource {
    pub name: String,
    pub mime_type: String,
    data: Arc<Vec<u8>>,
}

impl VideoSource {
    /// Only `video/*` MIME types are accepted.
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<Self, InputError> {
        let mime_type = mime_type.into();
        if !mime_type.starts_with("video/") {
            return Err(InputError::UnsupportedMedia {
                expected: "video",
                mime_type,
            });
        }
        Ok(Self {
            name: name.into(),
            mime_type,
            data: Arc::new(data),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn base64(&self) -> String {
        BASE64.encode(self.data.as_slice())
    }
}

/// What the decoder reports before any frame is requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    /// `None` when the container does not report a usable duration.
    pub duration_seconds: Option<f64>,
    pub width: u32,
    pub height: u32,
}

/// One JPEG still captured at a fixed offset into the video.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSample {
    /// 1-based position in the sampled sequence.
    pub frame_number: u32,
    /// Always `(frame_number - 1) * interval`.
    pub timestamp_seconds: f64,
    #[serde(skip)]
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Compression quality in (0, 1].
    pub quality: f32,
}

impl FrameSample {
    pub fn base64(&self) -> String {
        BASE64.encode(&self.jpeg)
    }

    pub fn data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.base64())
    }

    /// `m:ss.s`, e.g. `1:02.0`.
    pub fn formatted_time(&self) -> String {
        let minutes = (self.timestamp_seconds / 60.0).floor();
        let seconds = self.timestamp_seconds - minutes * 60.0;
        format!("{}:{:04.1}", minutes as u64, seconds)
    }
}

/// Error type for frame extraction
#[derive(Debug, thiserror::Error)]
pub enum SamplingError {
    #[error("No frames could be extracted from the video. Try a different video or a shorter frame interval.")]
    NoFrames,
    #[error("Decoder error: {0}")]
    Decoder(String),
    #[error("Decoder did not present the frame at {at_seconds:.1}s within {timeout_secs}s")]
    Timeout { at_seconds: f64, timeout_secs: u64 },
    #[error("Frame encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
