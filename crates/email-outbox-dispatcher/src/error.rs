//! Error types for the dispatcher and its ports.

use thiserror::Error;

/// Error returned by a port implementation (queue, template store,
/// provider, audit sink).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    /// Network or transport-level failure reaching the collaborator.
    #[error("transport error: {0}")]
    Transport(String),

    /// The collaborator answered with a non-success status.
    #[error("upstream error: {status} - {message}")]
    Upstream {
        /// HTTP (or HTTP-equivalent) status code.
        status: u16,
        /// Message reported by the collaborator.
        message: String,
    },

    /// Local storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The collaborator returned data that could not be interpreted.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using PortError.
pub type PortResult<T> = Result<T, PortError>;

/// Per-item failure. Absorbed into the run summary, never returned to the
/// caller of [`crate::Dispatcher::dispatch`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    /// The item names a template the store does not know.
    #[error("template not found: {0}")]
    TemplateMissing(String),

    /// The template store could not be queried.
    #[error("template lookup failed: {0}")]
    TemplateLookup(String),

    /// The provider rejected the message or could not be reached.
    #[error("provider failure: {0}")]
    Provider(String),
}

/// Fatal dispatch error: the initial batch could not be fetched, so nothing
/// was attempted.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to fetch pending emails: {0}")]
    Fetch(#[source] PortError),
}

/// Result type alias using DispatchError.
pub type RunResult<T> = Result<T, DispatchError>;
