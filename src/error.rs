use crate::ai::{ProviderError, ProviderKind};
use crate::capture::SamplingError;
use crate::orchestrator::Capability;
use crate::settings::SettingsError;

/// Problems with what the user supplied. Always raised before any network
/// activity and before session state is touched.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Please upload a video file.")]
    MissingVideo,
    #[error("Please upload at least one reference image.")]
    MissingReferences,
    #[error("Please enter your {} API key in the configuration.", .provider.display_name())]
    MissingCredential { provider: ProviderKind },
    #[error("Expected a {expected} file, got {mime_type}")]
    UnsupportedMedia {
        expected: &'static str,
        mime_type: String,
    },
    #[error("No reference image at position {0}")]
    NoSuchReference(usize),
    #[error("Question is empty")]
    EmptyQuestion,
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
    #[error("Another request is still running; wait for it to finish.")]
    Busy,
}

/// The capability ran but never produced its output. Distinct from a
/// provider failure: the remote side did not report an error.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("The {0} capability produced no output")]
    NoOutput(Capability),
}

#[derive(Debug, thiserror::Error)]
pub enum InspectorError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Sampling(#[from] SamplingError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl InspectorError {
    /// Stable tag for presentation layers.
    pub fn kind(&self) -> &'static str {
        match self {
            InspectorError::Input(_) => "input",
            InspectorError::Sampling(_) => "sampling",
            InspectorError::Provider(_) => "provider",
            InspectorError::Orchestration(_) => "orchestration",
            InspectorError::Settings(_) => "settings",
        }
    }
}
