//! Generation error types.

use thiserror::Error;

/// Errors that can occur while asking the service for dialogue.
///
/// Every variant is recoverable: callers substitute a canned line.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// No API key was configured.
    #[error("Missing API key (set {0})")]
    MissingCredentials(String),

    /// HTTP request failed before a response arrived.
    #[error("Generation request failed: {0}")]
    RequestFailed(String),

    /// The service answered with a non-2xx status.
    #[error("Generation service returned HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// Response was not valid JSON.
    #[error("Failed to parse generation response: {0}")]
    ParseError(String),

    /// Response parsed but held no text.
    #[error("Generation response contained no text")]
    EmptyResponse,

    /// Request timed out.
    #[error("Generation request timed out after {0}ms")]
    Timeout(u64),

    /// Provider is unavailable or disabled.
    #[error("Generation provider unavailable: {0}")]
    Unavailable(String),

    /// All retry attempts exhausted.
    #[error("All generation attempts exhausted after {attempts} tries: {last_error}")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The final failure.
        last_error: String,
    },
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout(0)
        } else if err.is_connect() {
            GenerationError::Unavailable(err.to_string())
        } else {
            GenerationError::RequestFailed(err.to_string())
        }
    }
}
