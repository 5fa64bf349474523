use thiserror::Error;

/// Failure taxonomy of one generation action.
///
/// Every variant is rendered to a human-readable status line; callers never
/// see a raw transport error.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Please provide a valid API key")]
    MissingCredential,
    #[error("Invalid option: {0}")]
    InvalidOption(String),
    #[error("Image generation failed: {0:#}")]
    ProviderFailure(#[source] anyhow::Error),
    #[error("No images were generated; check the prompt or try again")]
    EmptyResult,
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidOption(_) => "invalid_option",
            Self::ProviderFailure(_) => "provider_failure",
            Self::EmptyResult => "empty_result",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
