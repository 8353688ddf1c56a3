//! Error types for the Resend provider.

use email_outbox_dispatcher::PortError;
use thiserror::Error;

/// Errors that can occur while sending through Resend.
#[derive(Error, Debug)]
pub enum ResendError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response
    #[error("Resend API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Missing API key
    #[error("Missing Resend API key")]
    MissingApiKey,
}

/// Result type alias using ResendError.
pub type ResendResult<T> = Result<T, ResendError>;

impl From<ResendError> for PortError {
    fn from(e: ResendError) -> Self {
        match e {
            ResendError::Http(e) => PortError::Transport(e.to_string()),
            ResendError::ApiError { status, message } => PortError::Upstream { status, message },
            other => PortError::InvalidData(other.to_string()),
        }
    }
}
