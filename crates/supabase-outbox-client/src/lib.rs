//! Supabase adapter for the email outbox.
//!
//! Talks to PostgREST with the service-role key. The queue operations are
//! database functions exposed under `/rest/v1/rpc/*`; templates and audit
//! events are plain tables.

mod client;
mod error;

pub use client::SupabaseOutboxClient;
pub use error::{SupabaseError, SupabaseResult};
