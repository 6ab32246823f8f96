use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::capture::{FrameSample, VideoSource};
use crate::session::ReferenceImage;

/// Returned in place of a report when the backend answers without any text.
pub const NO_CONTENT: &str = "No content returned";

/// Channel that delivers classified increments from a running capability.
pub type AgentStream = mpsc::Receiver<AgentEvent>;

/// Which remote backend answers vision requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProviderKind {
    #[default]
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "Google Gemini",
            ProviderKind::OpenAi => "OpenAI GPT-4 Vision",
        }
    }

    /// Environment variable consulted for this backend's key.
    pub fn key_env_var(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn ingestion(&self) -> Ingestion {
        match self {
            ProviderKind::Gemini => Ingestion::WholeMedia,
            ProviderKind::OpenAi => Ingestion::FrameSequence,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
        })
    }
}

/// How a backend wants the video packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingestion {
    /// The raw video is inlined next to the reference images.
    WholeMedia,
    /// Sampled frames are inlined one by one, each with a label.
    FrameSequence,
}

/// Everything a single `invoke` sends to the backend.
///
/// Follow-up questions carry only `prompt`; analyses carry the media too and
/// each backend picks the packaging it understands.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    pub prompt: &'a str,
    pub video: Option<&'a VideoSource>,
    pub frames: &'a [FrameSample],
    pub references: &'a [ReferenceImage],
}

impl<'a> ProviderRequest<'a> {
    pub fn text(prompt: &'a str) -> Self {
        Self {
            prompt,
            video: None,
            frames: &[],
            references: &[],
        }
    }
}

/// One increment of a streamed capability run.
#[derive(Debug)]
pub enum AgentEvent {
    /// Intermediate state; only ever shown as a status line.
    Progress(String),
    /// The authoritative output. Consumers stop reading after this.
    Final(String),
    /// Remote failure. Consumers stop reading after this.
    Error(ProviderError),
}

/// Error type for remote provider calls
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{} API key is required", .provider.display_name())]
    MissingCredential { provider: ProviderKind },
    #[error("{} API Error ({status}): {message}", .provider.display_name())]
    Http {
        provider: ProviderKind,
        status: u16,
        message: String,
    },
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("No response from the provider within {0}s")]
    Timeout(u64),
}
