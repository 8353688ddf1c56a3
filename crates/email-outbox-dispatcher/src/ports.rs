//! Ports - the dispatcher's view of its collaborators.
//!
//! Each trait is a narrow contract over an external service. Implementations
//! live in the adapter crates (`email-outbox-database`,
//! `supabase-outbox-client`, `resend-client`).

use crate::error::PortResult;
use crate::model::{EmailTemplate, OutboxItem, OutboxStats, OutgoingEmail, ProviderReceipt};
use async_trait::async_trait;

/// How pending rows are read from the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Atomically claim the rows so overlapping runs never receive the same
    /// item. Claimed rows leave the pending count until marked or released.
    Claim,
    /// Read without side effects (dry run).
    Peek,
}

/// The pending-email queue.
///
/// Ordering (oldest first) is the store's responsibility.
#[async_trait]
pub trait OutboxQueue: Send + Sync {
    /// Fetch up to `limit` pending items.
    async fn fetch_pending(&self, limit: usize, mode: FetchMode) -> PortResult<Vec<OutboxItem>>;

    /// Terminal success.
    async fn mark_sent(&self, id: &str) -> PortResult<()>;

    /// Terminal failure with the error message.
    async fn mark_error(&self, id: &str, message: &str) -> PortResult<()>;

    /// Return a claimed item to the pending state without recording an
    /// attempt (policy-blocked items).
    async fn release(&self, id: &str) -> PortResult<()>;

    /// Current queue counters.
    async fn stats(&self) -> PortResult<OutboxStats>;
}

/// Named template lookup.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// `Ok(None)` when no template has that name.
    async fn get_template(&self, name: &str) -> PortResult<Option<EmailTemplate>>;
}

/// Email delivery provider.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> PortResult<ProviderReceipt>;
}

/// Best-effort audit trail. Failures are logged by the caller and otherwise
/// ignored.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_event(&self, event_type: &str, payload: serde_json::Value) -> PortResult<()>;
}

/// Audit sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record_event(&self, _event_type: &str, _payload: serde_json::Value) -> PortResult<()> {
        Ok(())
    }
}
