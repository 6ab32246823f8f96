use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ai::{gemini, openai, ProviderKind};
use crate::capture::SamplerConfig;
use crate::error::InputError;

/// How many frames an analysis may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramePreset {
    /// 10 frames
    Fast,
    /// 15 frames
    Balanced,
    /// 20 frames
    #[default]
    Detailed,
}

impl FramePreset {
    pub fn max_frames(&self) -> u32 {
        match self {
            FramePreset::Fast => 10,
            FramePreset::Balanced => 15,
            FramePreset::Detailed => 20,
        }
    }
}

/// JPEG quality presets for sampled frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    Standard,
    #[default]
    High,
    Maximum,
}

impl ImageQuality {
    pub fn fraction(&self) -> f32 {
        match self {
            ImageQuality::Standard => 0.8,
            ImageQuality::High => 0.9,
            ImageQuality::Maximum => 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub provider: ProviderKind,
    pub gemini_api_key: String,
    pub openai_api_key: String,
    pub gemini_model: String,
    pub openai_model: String,
    /// Empty means the public API endpoint.
    pub gemini_endpoint: String,
    pub openai_endpoint: String,
    /// Seconds between sampled frames.
    pub frame_interval: u32,
    pub max_frames: FramePreset,
    pub image_quality: ImageQuality,
    /// Ask the backend for an SSE stream instead of a single JSON body.
    pub stream_responses: bool,
    pub frame_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            gemini_api_key: String::new(),
            openai_api_key: String::new(),
            gemini_model: gemini::DEFAULT_MODEL.into(),
            openai_model: openai::DEFAULT_MODEL.into(),
            gemini_endpoint: String::new(),
            openai_endpoint: String::new(),
            frame_interval: 2,
            max_frames: FramePreset::Detailed,
            image_quality: ImageQuality::High,
            stream_responses: false,
            frame_timeout_secs: 15,
            request_timeout_secs: 180,
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("no config directory on this platform")]
    NoConfigDir,
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// `<config_dir>/line-inspector/settings.toml`
pub fn config_path() -> Result<PathBuf, SettingsError> {
    let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(dir.join("line-inspector").join("settings.toml"))
}

impl Settings {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(io_err)?;
        log::info!("Settings saved to {}", path.display());
        Ok(())
    }

    /// Fill empty keys from `GEMINI_API_KEY` / `OPENAI_API_KEY`.
    pub fn with_env_overrides(mut self) -> Self {
        for kind in [ProviderKind::Gemini, ProviderKind::OpenAi] {
            let slot = match kind {
                ProviderKind::Gemini => &mut self.gemini_api_key,
                ProviderKind::OpenAi => &mut self.openai_api_key,
            };
            if slot.trim().is_empty() {
                if let Ok(key) = std::env::var(kind.key_env_var()) {
                    *slot = key;
                }
            }
        }
        self
    }

    /// Key for the selected provider, if one is configured.
    pub fn api_key(&self) -> Option<&str> {
        let key = match self.provider {
            ProviderKind::Gemini => &self.gemini_api_key,
            ProviderKind::OpenAi => &self.openai_api_key,
        };
        let key = key.trim();
        (!key.is_empty()).then_some(key)
    }

    pub fn validate(&self) -> Result<(), InputError> {
        if self.frame_interval < 1 {
            return Err(InputError::InvalidSetting(
                "frame interval must be at least 1 second".into(),
            ));
        }
        if self.frame_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(InputError::InvalidSetting("timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            interval_secs: self.frame_interval,
            max_frames: self.max_frames.max_frames(),
            quality: self.image_quality.fraction(),
            frame_timeout: Duration::from_secs(self.frame_timeout_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_presets() {
        let s = Settings::default();
        assert_eq!(s.provider, ProviderKind::Gemini);
        assert_eq!(s.frame_interval, 2);
        assert_eq!(s.sampler_config().max_frames, 20);
        assert_eq!(s.sampler_config().quality, 0.9);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let s: Settings = toml::from_str(
            r#"
            provider = "openai"
            openaiApiKey = "sk-test"
            frameInterval = 3
            maxFrames = "fast"
            imageQuality = "maximum"
            "#,
        )
        .unwrap();
        assert_eq!(s.provider, ProviderKind::OpenAi);
        assert_eq!(s.api_key(), Some("sk-test"));
        assert_eq!(s.max_frames.max_frames(), 10);
        assert_eq!(s.image_quality.fraction(), 0.95);
        assert_eq!(s.openai_model, "gpt-4o");
    }

    #[test]
    fn unknown_preset_is_rejected() {
        assert!(toml::from_str::<Settings>(r#"maxFrames = "huge""#).is_err());
    }

    #[test]
    fn api_key_follows_selected_provider() {
        let mut s = Settings {
            gemini_api_key: "g-key".into(),
            ..Settings::default()
        };
        assert_eq!(s.api_key(), Some("g-key"));
        s.provider = ProviderKind::OpenAi;
        assert_eq!(s.api_key(), None);
        s.openai_api_key = "   ".into();
        assert_eq!(s.api_key(), None);
    }

    #[test]
    fn zero_interval_is_invalid() {
        let s = Settings {
            frame_interval: 0,
            ..Settings::default()
        };
        assert!(matches!(s.validate(), Err(InputError::InvalidSetting(_))));
    }

    #[test]
    fn save_and_load_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        assert_eq!(Settings::load_from(&path).unwrap(), Settings::default());

        let s = Settings {
            provider: ProviderKind::OpenAi,
            stream_responses: true,
            ..Settings::default()
        };
        s.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), s);
    }
}
