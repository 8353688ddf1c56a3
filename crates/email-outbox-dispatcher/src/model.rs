//! Outbox data model shared by the dispatcher and its adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A message waiting in the outbox.
///
/// Inserted by the registration flow; the dispatcher only reads it and
/// reports the outcome back to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
    /// Queue row identifier. Numeric ids from the store are accepted.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Name of the template to render.
    pub template: String,
    /// Recipient address.
    pub to_email: String,
    /// Producer-supplied key used to de-duplicate deliveries.
    pub idempotency_key: String,
    /// Template variables (top-level keys of a JSON object).
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// When the row was enqueued.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl OutboxItem {
    /// Create an item with no payload (mostly useful in tests and the CLI).
    pub fn new(
        id: impl Into<String>,
        template: impl Into<String>,
        to_email: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            template: template.into(),
            to_email: to_email.into(),
            idempotency_key: idempotency_key.into(),
            payload: None,
            created_at: None,
        }
    }

    /// Attach template variables.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// A named email template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub subject: String,
    pub html: String,
}

impl EmailTemplate {
    pub fn new(subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            html: html.into(),
        }
    }
}

/// Queue counters. `total_pending` is the only figure the dispatcher relies on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxStats {
    pub total_pending: u64,
    #[serde(default)]
    pub processing: u64,
    #[serde(default)]
    pub sent: u64,
    #[serde(default)]
    pub error: u64,
}

/// A fully rendered message handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    /// Forwarded to the provider so a re-delivered item is de-duplicated.
    #[serde(skip)]
    pub idempotency_key: String,
}

/// Provider acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReceipt {
    /// Provider-side message id, when the provider returns one.
    #[serde(default)]
    pub id: Option<String>,
}
