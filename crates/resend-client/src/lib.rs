//! Resend email provider.

mod client;
mod error;

pub use client::{ResendClient, DEFAULT_RESEND_API_URL};
pub use error::{ResendError, ResendResult};
