//! Error types for Supabase outbox operations.

use email_outbox_dispatcher::PortError;
use thiserror::Error;

/// Error type for all Supabase outbox operations.
#[derive(Debug, Error)]
pub enum SupabaseError {
    /// Network or transport-level HTTP error from reqwest.
    ///
    /// Includes connection failures, timeouts, and TLS errors.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Supabase API returned a non-success HTTP status.
    ///
    /// Common causes: wrong service-role key, missing RPC function, schema
    /// mismatch.
    #[error("Supabase error: {status} - {message}")]
    Supabase {
        /// The HTTP status code returned by Supabase.
        status: u16,
        /// The response body, typically containing error details.
        message: String,
    },

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration or initialization error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience Result type alias for Supabase operations.
pub type SupabaseResult<T> = Result<T, SupabaseError>;

impl From<SupabaseError> for PortError {
    fn from(e: SupabaseError) -> Self {
        match e {
            SupabaseError::Http(e) => PortError::Transport(e.to_string()),
            SupabaseError::Supabase { status, message } => PortError::Upstream { status, message },
            SupabaseError::Json(e) => PortError::InvalidData(e.to_string()),
            SupabaseError::Config(msg) => PortError::InvalidData(msg),
        }
    }
}
