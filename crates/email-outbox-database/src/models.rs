//! Row types for the outbox tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an outbox row.
///
/// `pending -> processing -> sent | error`; a released claim goes back to
/// `pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    #[default]
    Pending,
    Processing,
    Sent,
    Error,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "processing" => Self::Processing,
            "sent" => Self::Sent,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }
}

/// A message to enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEmail {
    pub template: String,
    pub to_email: String,
    pub idempotency_key: String,
    pub payload: Option<serde_json::Value>,
}

impl NewOutboxEmail {
    pub fn new(
        template: impl Into<String>,
        to_email: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            template: template.into(),
            to_email: to_email.into(),
            idempotency_key: idempotency_key.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Full outbox row, including delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEmail {
    pub id: String,
    pub template: String,
    pub to_email: String,
    pub idempotency_key: String,
    pub payload: Option<serde_json::Value>,
    pub status: OutboxStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Stored template with its last update time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTemplate {
    pub name: String,
    pub subject: String,
    pub html: String,
    pub updated_at: DateTime<Utc>,
}

/// Recorded audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
