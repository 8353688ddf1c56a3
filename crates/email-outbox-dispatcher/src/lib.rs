//! # Email outbox dispatcher
//!
//! Drains a pending-email queue in batches, renders each message against a
//! named template, sends it through an email provider and records the outcome
//! back into the queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  fetch   ┌──────────────┐  send   ┌──────────────┐
//! │ OutboxQueue  │────────▶│  Dispatcher  │────────▶│EmailProvider │
//! │ (SQLite /    │◀────────│ policy +     │         │  (Resend)    │
//! │  Supabase)   │ mark_*  │ reduction    │         └──────────────┘
//! └──────────────┘         └──────┬───────┘
//!        ▲ get_template           │ record_event (best effort)
//! ┌──────┴───────┐         ┌──────▼───────┐
//! │TemplateStore │         │  AuditSink   │
//! └──────────────┘         └──────────────┘
//! ```
//!
//! The collaborators are traits in [`ports`]; the run-level policy is an
//! explicit [`EmailConfig`] value handed to [`Dispatcher::dispatch`].
//!
//! Each item ends a run in exactly one of four classifications: sent,
//! would-send (dry run), blocked (allowlist or cap) or error. Per-item
//! failures never abort the batch. Only a failure to reach the queue
//! ([`DispatchError`]) is surfaced to the caller.

mod config;
mod dispatcher;
mod error;
mod model;
mod outcome;
pub mod ports;
mod redact;
mod render;

pub use config::{DispatchMode, EmailConfig};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, ItemError, PortError, PortResult, RunResult};
pub use model::{EmailTemplate, OutboxItem, OutboxStats, OutgoingEmail, ProviderReceipt};
pub use outcome::{BlockReason, BlockedItem, DispatchDetails, DispatchResult, FailedItem, ItemOutcome};
pub use ports::{AuditSink, EmailProvider, FetchMode, NoopAuditSink, OutboxQueue, TemplateStore};
pub use redact::redact_email;
pub use render::render_template;
