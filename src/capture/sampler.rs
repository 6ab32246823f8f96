// sampler.rs — Walks a video at a fixed cadence, one seek at a time, and
// JPEG-encodes each presented frame into a buffer sized to the source.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, GenericImageView, RgbImage};
use std::time::Duration;
use tokio::time::timeout;

use super::{FrameSample, SamplingError, VideoMetadata, VideoSource};

/// A stateful decoder bound to one video.
///
/// Seeks are not reentrant: the sampler holds `&mut` for the whole pass, so a
/// second seek can never start before the previous frame has been presented.
#[async_trait]
pub trait MediaDecoder: Send {
    /// Load duration and pixel dimensions. Called once, before any seek.
    async fn load_metadata(&mut self) -> Result<VideoMetadata, SamplingError>;

    /// Seek to `at_seconds` and resolve once that frame has been presented.
    async fn present_frame(&mut self, at_seconds: f64) -> Result<DynamicImage, SamplingError>;
}

/// Opens a fresh decoder for each extraction pass.
#[async_trait]
pub trait DecoderFactory: Send + Sync {
    async fn open(&self, video: &VideoSource) -> Result<Box<dyn MediaDecoder>, SamplingError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Seconds between captures; at least 1.
    pub interval_secs: u32,
    pub max_frames: u32,
    /// JPEG quality as a fraction in (0, 1].
    pub quality: f32,
    /// Bound on metadata loading and on every single seek.
    pub frame_timeout: Duration,
}

/// `min(floor(D / I), M)`; zero when the duration is missing or not positive.
pub fn frame_count(duration_seconds: Option<f64>, interval_secs: u32, max_frames: u32) -> u32 {
    let Some(duration) = duration_seconds.filter(|d| d.is_finite() && *d > 0.0) else {
        return 0;
    };
    if interval_secs == 0 {
        return 0;
    }
    let n = (duration / f64::from(interval_secs)).floor();
    n.min(f64::from(max_frames)) as u32
}

/// Map a (0, 1] quality fraction onto the encoder's 1–100 scale.
pub fn jpeg_quality(fraction: f32) -> u8 {
    (fraction * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Extract the frame sequence.
///
/// An empty result is not an error here: a video that is too short for the
/// interval simply yields nothing, and the caller decides what that means.
/// `on_progress` receives the completed fraction after each capture.
pub async fn sample_frames<F>(
    decoder: &mut dyn MediaDecoder,
    config: &SamplerConfig,
    mut on_progress: F,
) -> Result<Vec<FrameSample>, SamplingError>
where
    F: FnMut(f32) + Send,
{
    let timeout_secs = config.frame_timeout.as_secs();

    let metadata = timeout(config.frame_timeout, decoder.load_metadata())
        .await
        .map_err(|_| SamplingError::Timeout {
            at_seconds: 0.0,
            timeout_secs,
        })??;

    let total = frame_count(metadata.duration_seconds, config.interval_secs, config.max_frames);
    log::info!(
        "Sampling {} frame(s) (duration={:?}s, interval={}s, cap={})",
        total,
        metadata.duration_seconds,
        config.interval_secs,
        config.max_frames
    );

    // The raster buffer is sized once, from the source, and reused for every frame.
    let mut raster_size = (metadata.width > 0 && metadata.height > 0)
        .then_some((metadata.width, metadata.height));
    let quality = jpeg_quality(config.quality);
    let mut frames = Vec::with_capacity(total as usize);

    for i in 0..total {
        let at_seconds = f64::from(i) * f64::from(config.interval_secs);

        let image = timeout(config.frame_timeout, decoder.present_frame(at_seconds))
            .await
            .map_err(|_| SamplingError::Timeout {
                at_seconds,
                timeout_secs,
            })??;

        let (width, height) = *raster_size.get_or_insert_with(|| image.dimensions());
        let raster = rasterize(image, width, height);
        let jpeg = encode_jpeg(&raster, quality)?;

        log::debug!(
            "Captured frame {} at {:.1}s ({}x{}, {} bytes)",
            i + 1,
            at_seconds,
            width,
            height,
            jpeg.len()
        );

        frames.push(FrameSample {
            frame_number: i + 1,
            timestamp_seconds: at_seconds,
            jpeg,
            width,
            height,
            quality: config.quality,
        });

        on_progress((i + 1) as f32 / total as f32);
    }

    Ok(frames)
}

fn rasterize(image: DynamicImage, width: u32, height: u32) -> RgbImage {
    let image = if image.dimensions() != (width, height) {
        image.resize_exact(width, height, imageops::FilterType::Triangle)
    } else {
        image
    };
    image.to_rgb8()
}

fn encode_jpeg(raster: &RgbImage, quality: u8) -> Result<Vec<u8>, SamplingError> {
    let mut jpeg_buf: Vec<u8> = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_buf, quality);
    encoder.encode(
        raster.as_raw(),
        raster.width(),
        raster.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(jpeg_buf)
}
