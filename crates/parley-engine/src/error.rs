//! Error types for parley-engine

use thiserror::Error;

/// Result type alias using parley-engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised before a generation starts streaming.
///
/// Once frames are flowing, failures are folded into the stream instead.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the model provider layer
    #[error(transparent)]
    Ai(#[from] parley_ai::Error),

    /// A persistence collaborator failed
    #[error("Repository error: {0}")]
    Repository(String),

    /// The caller may not touch this conversation or workspace
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The request itself is malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No chat model is configured for the workspace or bot
    #[error("Model not configured: {0}")]
    ModelNotConfigured(String),

    /// Background summarization failed
    #[error("Summarization error: {0}")]
    Summarization(String),
}

impl Error {
    /// Check if this error means the caller lacks access
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }

    /// Convert a model resolution failure, keeping "nothing configured" distinct
    pub(crate) fn from_resolution(error: parley_ai::Error) -> Self {
        match error {
            parley_ai::Error::ModelNotFound(message) => Error::ModelNotConfigured(message),
            other => Error::Ai(other),
        }
    }
}
