//! Dispatcher ports backed by the local SQLite database.

use crate::{
    queries, AsyncDatabase, AuditEvent, DatabaseError, DatabaseResult, NewOutboxEmail,
    OutboxEmail, StoredTemplate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use email_outbox_dispatcher::{
    AuditSink, EmailTemplate, FetchMode, OutboxItem, OutboxQueue, OutboxStats, PortResult,
    TemplateStore,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outbox queue, template store and audit sink over one [`AsyncDatabase`].
///
/// Remembers when each row it claimed was claimed, so outcomes are only
/// written while that claim still owns the row.
#[derive(Clone)]
pub struct SqliteOutboxStore {
    db: AsyncDatabase,
    claim_ttl: Duration,
    claims: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl SqliteOutboxStore {
    /// Wrap an open database. Claims older than `claim_ttl` are treated as
    /// abandoned.
    pub fn new(db: AsyncDatabase, claim_ttl: Duration) -> Self {
        Self {
            db,
            claim_ttl,
            claims: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open the database at `path` and wrap it.
    pub async fn open(path: &Path, claim_ttl: Duration) -> DatabaseResult<Self> {
        Ok(Self::new(AsyncDatabase::open(path).await?, claim_ttl))
    }

    pub fn database(&self) -> &AsyncDatabase {
        &self.db
    }

    /// Queue a message. Returns `None` when the idempotency key already exists.
    pub async fn enqueue(&self, email: NewOutboxEmail) -> DatabaseResult<Option<String>> {
        self.db
            .call(move |conn| queries::enqueue_email(conn, &email, Utc::now()))
            .await
    }

    /// Create or replace a named template.
    pub async fn upsert_template(&self, name: &str, subject: &str, html: &str) -> DatabaseResult<()> {
        let (name, subject, html) = (name.to_string(), subject.to_string(), html.to_string());
        self.db
            .call(move |conn| queries::upsert_template(conn, &name, &subject, &html, Utc::now()))
            .await
    }

    pub async fn stored_template(&self, name: &str) -> DatabaseResult<Option<StoredTemplate>> {
        let name = name.to_string();
        self.db
            .call(move |conn| queries::get_template(conn, &name))
            .await
    }

    pub async fn get_email(&self, id: &str) -> DatabaseResult<Option<OutboxEmail>> {
        let id = id.to_string();
        self.db
            .call(move |conn| queries::get_outbox_email(conn, &id))
            .await
    }

    /// Most recent audit events, newest first.
    pub async fn list_events(&self, limit: usize) -> DatabaseResult<Vec<AuditEvent>> {
        self.db
            .call(move |conn| queries::list_audit_events(conn, limit))
            .await
    }

    /// Claims made before this instant have expired.
    fn stale_before(&self, now: DateTime<Utc>) -> DatabaseResult<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(self.claim_ttl)
            .map_err(|e| DatabaseError::InvalidData(format!("claim ttl out of range: {e}")))?;
        Ok(now - ttl)
    }

    async fn claim(&self, limit: usize) -> DatabaseResult<Vec<OutboxItem>> {
        let now = Utc::now();
        let stale_before = self.stale_before(now)?;

        let items = self
            .db
            .call(move |conn| queries::claim_pending_emails(conn, limit, now, stale_before))
            .await?;

        self.claims
            .lock()
            .extend(items.iter().map(|item| (item.id.clone(), now)));

        debug!(claimed = items.len(), limit, "Claimed outbox emails");
        Ok(items)
    }

    /// When this store claimed `id`. Rows it never claimed have no claim to act on.
    fn claimed_at(&self, id: &str) -> DatabaseResult<DateTime<Utc>> {
        self.claims
            .lock()
            .get(id)
            .copied()
            .ok_or_else(|| DatabaseError::ClaimLost(format!("outbox email {id} is not claimed here")))
    }

    fn forget_claim(&self, id: &str) {
        self.claims.lock().remove(id);
    }
}

#[async_trait]
impl OutboxQueue for SqliteOutboxStore {
    async fn fetch_pending(&self, limit: usize, mode: FetchMode) -> PortResult<Vec<OutboxItem>> {
        let items = match mode {
            FetchMode::Claim => self.claim(limit).await?,
            FetchMode::Peek => {
                let stale_before = self.stale_before(Utc::now())?;
                self.db
                    .call(move |conn| queries::peek_pending_emails(conn, limit, stale_before))
                    .await?
            }
        };
        Ok(items)
    }

    async fn mark_sent(&self, id: &str) -> PortResult<()> {
        let claimed_at = self.claimed_at(id)?;
        let row = id.to_string();
        let result = self
            .db
            .call(move |conn| queries::mark_email_sent(conn, &row, claimed_at, Utc::now()))
            .await;
        self.forget_claim(id);
        Ok(result?)
    }

    async fn mark_error(&self, id: &str, message: &str) -> PortResult<()> {
        let claimed_at = self.claimed_at(id)?;
        let (row, message) = (id.to_string(), message.to_string());
        let result = self
            .db
            .call(move |conn| queries::mark_email_error(conn, &row, claimed_at, &message))
            .await;
        self.forget_claim(id);
        Ok(result?)
    }

    async fn release(&self, id: &str) -> PortResult<()> {
        let claimed_at = self.claimed_at(id)?;
        let row = id.to_string();
        let result = self
            .db
            .call(move |conn| queries::release_email(conn, &row, claimed_at))
            .await;
        self.forget_claim(id);
        Ok(result?)
    }

    async fn stats(&self) -> PortResult<OutboxStats> {
        let stale_before = self.stale_before(Utc::now())?;
        Ok(self
            .db
            .call(move |conn| queries::outbox_stats(conn, stale_before))
            .await?)
    }
}

#[async_trait]
impl TemplateStore for SqliteOutboxStore {
    async fn get_template(&self, name: &str) -> PortResult<Option<EmailTemplate>> {
        let stored = self.stored_template(name).await?;
        Ok(stored.map(|t| EmailTemplate::new(t.subject, t.html)))
    }
}

#[async_trait]
impl AuditSink for SqliteOutboxStore {
    async fn record_event(&self, event_type: &str, payload: serde_json::Value) -> PortResult<()> {
        let event_type = event_type.to_string();
        self.db
            .call(move |conn| queries::insert_audit_event(conn, &event_type, &payload, Utc::now()))
            .await?;
        Ok(())
    }
}
