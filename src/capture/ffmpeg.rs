// ffmpeg.rs — Production decoder backed by the ffmpeg/ffprobe binaries.
//
// The upload is spilled to a temp file so ffmpeg can seek in it; each
// `present_frame` runs one accurate seek and pipes back a single PNG.

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::process::Command;

use super::{DecoderFactory, MediaDecoder, SamplingError, VideoMetadata, VideoSource};

/// Opens an [`FfmpegDecoder`] per extraction pass.
#[derive(Debug, Clone)]
pub struct FfmpegDecoderFactory {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl FfmpegDecoderFactory {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[async_trait]
impl DecoderFactory for FfmpegDecoderFactory {
    async fn open(&self, video: &VideoSource) -> Result<Box<dyn MediaDecoder>, SamplingError> {
        let file = tempfile::Builder::new()
            .prefix("line-inspector-")
            .suffix(extension_for(&video.mime_type))
            .tempfile()?;
        tokio::fs::write(file.path(), video.bytes()).await?;
        log::debug!(
            "Spilled {} ({} bytes) to {}",
            video.name,
            video.bytes().len(),
            file.path().display()
        );

        Ok(Box::new(FfmpegDecoder {
            ffmpeg_path: self.ffmpeg_path.clone(),
            ffprobe_path: self.ffprobe_path.clone(),
            file,
            metadata: None,
        }))
    }
}

/// One video, one temp file. The temp file is removed on drop.
pub struct FfmpegDecoder {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    file: NamedTempFile,
    metadata: Option<VideoMetadata>,
}

impl FfmpegDecoder {
    fn path(&self) -> &Path {
        self.file.path()
    }
}

#[async_trait]
impl MediaDecoder for FfmpegDecoder {
    async fn load_metadata(&mut self) -> Result<VideoMetadata, SamplingError> {
        if let Some(metadata) = self.metadata {
            return Ok(metadata);
        }

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,duration:format=duration",
                "-of",
                "json",
            ])
            .arg(self.path())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SamplingError::Decoder(format!("spawn ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(SamplingError::Decoder(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let metadata = parse_probe_output(&output.stdout)?;
        self.metadata = Some(metadata);
        Ok(metadata)
    }

    async fn present_frame(&mut self, at_seconds: f64) -> Result<DynamicImage, SamplingError> {
        // `-ss` after `-i` decodes up to the exact timestamp instead of
        // snapping to the nearest keyframe.
        let output = Command::new(&self.ffmpeg_path)
            .args(["-v", "error", "-i"])
            .arg(self.path())
            .args([
                "-ss",
                &format!("{at_seconds:.3}"),
                "-frames:v",
                "1",
                "-f",
                "image2pipe",
                "-vcodec",
                "png",
                "-",
            ])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SamplingError::Decoder(format!("spawn ffmpeg: {e}")))?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(SamplingError::Decoder(format!(
                "no frame presented at {at_seconds:.3}s: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let image = image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)?;
        Ok(image)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -of json`. Durations come back as strings and may be
/// `"N/A"`; the container duration wins over the stream duration.
fn parse_probe_output(stdout: &[u8]) -> Result<VideoMetadata, SamplingError> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| SamplingError::Decoder(format!("unreadable ffprobe output: {e}")))?;

    let stream = probe
        .streams
        .first()
        .ok_or_else(|| SamplingError::Decoder("no video stream found".into()))?;

    let parse = |d: &Option<String>| d.as_deref().and_then(|s| s.trim().parse::<f64>().ok());
    let duration_seconds = probe
        .format
        .as_ref()
        .and_then(|f| parse(&f.duration))
        .or_else(|| parse(&stream.duration))
        .filter(|d| d.is_finite() && *d > 0.0);

    Ok(VideoMetadata {
        duration_seconds,
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
    })
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "video/mp4" => ".mp4",
        "video/quicktime" => ".mov",
        "video/webm" => ".webm",
        "video/x-matroska" => ".mkv",
        "video/x-msvideo" => ".avi",
        _ => ".bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_output_with_format_duration() {
        let json = br#"{"streams":[{"width":1920,"height":1080}],"format":{"duration":"45.120000"}}"#;
        let meta = parse_probe_output(json).unwrap();
        assert_eq!(meta.width, 1920);
        assert_eq!(meta.height, 1080);
        assert_eq!(meta.duration_seconds, Some(45.12));
    }

    #[test]
    fn probe_output_falls_back_to_stream_duration() {
        let json = br#"{"streams":[{"width":640,"height":480,"duration":"10.0"}],"format":{"duration":"N/A"}}"#;
        let meta = parse_probe_output(json).unwrap();
        assert_eq!(meta.duration_seconds, Some(10.0));
    }

    #[test]
    fn probe_output_without_duration() {
        let json = br#"{"streams":[{"width":640,"height":480}],"format":{}}"#;
        assert_eq!(parse_probe_output(json).unwrap().duration_seconds, None);
    }

    #[test]
    fn probe_output_without_video_stream_is_an_error() {
        let json = br#"{"streams":[],"format":{"duration":"3.0"}}"#;
        assert!(matches!(parse_probe_output(json), Err(SamplingError::Decoder(_))));
        assert!(parse_probe_output(b"garbage").is_err());
    }

    #[test]
    fn extension_matches_mime() {
        assert_eq!(extension_for("video/mp4"), ".mp4");
        assert_eq!(extension_for("video/quicktime"), ".mov");
        assert_eq!(extension_for("video/ogg"), ".bin");
    }
}
