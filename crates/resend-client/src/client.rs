//! Resend API client.
//!
//! Sends one message per request to `POST /emails`. The outbox item's
//! idempotency key travels in the `Idempotency-Key` header so Resend drops a
//! repeated delivery of the same item.

use crate::error::{ResendError, ResendResult};
use async_trait::async_trait;
use email_outbox_dispatcher::{EmailProvider, OutgoingEmail, PortResult, ProviderReceipt};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Production API base URL.
pub const DEFAULT_RESEND_API_URL: &str = "https://api.resend.com";

fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// Resend client.
#[derive(Clone)]
pub struct ResendClient {
    http_client: reqwest::Client,
    api_key: String,
    api_url: String,
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl ResendClient {
    /// Create a client for the production API.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_RESEND_API_URL.to_string(),
        }
    }

    /// Create a client from the RESEND_API_KEY environment variable.
    ///
    /// # Errors
    /// Returns `ResendError::MissingApiKey` if the variable is unset or blank.
    pub fn from_env() -> ResendResult<Self> {
        let api_key = std::env::var("RESEND_API_KEY").map_err(|_| ResendError::MissingApiKey)?;
        if api_key.trim().is_empty() {
            return Err(ResendError::MissingApiKey);
        }
        Ok(Self::new(api_key))
    }

    /// Point the client at another base URL.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Apply a request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> ResendResult<Self> {
        self.http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Send one email. Returns the Resend message id when present.
    pub async fn send_email(&self, email: &OutgoingEmail) -> ResendResult<Option<String>> {
        let request = SendEmailRequest {
            from: &email.from,
            to: [&email.to],
            subject: &email.subject,
            html: &email.html,
        };

        tracing::debug!(idempotency_key = %email.idempotency_key, "Sending email through Resend");

        let mut builder = self
            .http_client
            .post(format!("{}/emails", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if !email.idempotency_key.is_empty() {
            builder = builder.header("Idempotency-Key", &email.idempotency_key);
        }

        let response = builder.json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(parsed) => parsed.message,
                Err(_) => format!("upstream error ({})", summarize_response_body(&body)),
            };
            tracing::error!(status, message = %message, "Resend API error");
            return Err(ResendError::ApiError { status, message });
        }

        let sent: SendEmailResponse = response.json().await?;
        Ok(sent.id)
    }
}

impl std::fmt::Debug for ResendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResendClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EmailProvider for ResendClient {
    async fn send(&self, email: &OutgoingEmail) -> PortResult<ProviderReceipt> {
        let id = self.send_email(email).await?;
        Ok(ProviderReceipt { id })
    }
}
