//! Supabase REST API client for the email outbox.

use crate::error::{SupabaseError, SupabaseResult};
use async_trait::async_trait;
use email_outbox_dispatcher::{
    AuditSink, EmailTemplate, FetchMode, OutboxItem, OutboxQueue, OutboxStats, PortResult,
    TemplateStore,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

/// Supabase client using the service-role key.
#[derive(Clone)]
pub struct SupabaseOutboxClient {
    http_client: reqwest::Client,
    api_url: String,
    service_role_key: String,
}

impl SupabaseOutboxClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_url` - The Supabase project URL (e.g., `https://xyz.supabase.co`)
    /// * `service_role_key` - The service-role API key
    pub fn new(api_url: impl Into<String>, service_role_key: impl Into<String>) -> Self {
        Self::with_http_client(reqwest::Client::new(), api_url, service_role_key)
    }

    /// Create a client whose requests time out after `timeout`.
    pub fn with_timeout(
        api_url: impl Into<String>,
        service_role_key: impl Into<String>,
        timeout: Duration,
    ) -> SupabaseResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SupabaseError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(http_client, api_url, service_role_key))
    }

    fn with_http_client(
        http_client: reqwest::Client,
        api_url: impl Into<String>,
        service_role_key: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            service_role_key: service_role_key.into(),
        }
    }

    /// Build the REST API URL for a table or RPC path.
    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, path)
    }

    /// Claim up to `limit` pending emails (oldest first).
    pub async fn claim_pending_emails(&self, limit: usize) -> SupabaseResult<Vec<OutboxItem>> {
        let items: Vec<OutboxItem> = self
            .rpc_json("claim_pending_emails", &json!({ "p_limit": limit }))
            .await?;
        debug!(count = items.len(), limit, "Claimed pending emails from Supabase");
        Ok(items)
    }

    /// Read up to `limit` pending emails without claiming them.
    pub async fn peek_pending_emails(&self, limit: usize) -> SupabaseResult<Vec<OutboxItem>> {
        self.rpc_json("peek_pending_emails", &json!({ "p_limit": limit }))
            .await
    }

    pub async fn mark_email_sent(&self, id: &str) -> SupabaseResult<()> {
        self.rpc("mark_email_sent", &json!({ "p_id": id })).await?;
        Ok(())
    }

    pub async fn mark_email_error(&self, id: &str, message: &str) -> SupabaseResult<()> {
        self.rpc("mark_email_error", &json!({ "p_id": id, "p_error": message }))
            .await?;
        Ok(())
    }

    pub async fn release_email(&self, id: &str) -> SupabaseResult<()> {
        self.rpc("release_email", &json!({ "p_id": id })).await?;
        Ok(())
    }

    /// Queue counters. Accepts either a single row or a one-row set.
    pub async fn get_email_outbox_stats(&self) -> SupabaseResult<OutboxStats> {
        let value: serde_json::Value = self.rpc_json("get_email_outbox_stats", &json!({})).await?;
        let row = match value {
            serde_json::Value::Array(mut rows) if !rows.is_empty() => rows.swap_remove(0),
            serde_json::Value::Array(_) => {
                return Err(SupabaseError::Config(
                    "get_email_outbox_stats returned no rows".to_string(),
                ))
            }
            other => other,
        };
        Ok(serde_json::from_value(row)?)
    }

    /// Fetch a template by name.
    pub async fn get_email_template(&self, name: &str) -> SupabaseResult<Option<EmailTemplate>> {
        let response = self
            .http_client
            .get(self.rest_url("email_templates"))
            .query(&[("name", format!("eq.{name}")), ("select", "subject,html".to_string())])
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .send()
            .await?;

        let response = self.check_response(response).await?;
        let mut rows: Vec<EmailTemplate> = response.json().await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// Insert an audit event row.
    pub async fn insert_audit_event(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> SupabaseResult<()> {
        let response = self
            .http_client
            .post(self.rest_url("audit_events"))
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Prefer", "return=minimal")
            .json(&json!({ "event_type": event_type, "payload": payload }))
            .send()
            .await?;

        self.check_response(response).await?;
        Ok(())
    }

    // =========================================================================
    // HTTP helpers
    // =========================================================================

    /// Call an RPC function and return the checked response.
    async fn rpc<T: Serialize + ?Sized>(
        &self,
        function: &str,
        body: &T,
    ) -> SupabaseResult<reqwest::Response> {
        let response = self
            .http_client
            .post(self.rest_url(&format!("rpc/{function}")))
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        self.check_response(response).await
    }

    async fn rpc_json<T, B>(&self, function: &str, body: &B) -> SupabaseResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.rpc(function, body).await?;
        Ok(response.json().await?)
    }

    /// Check HTTP response for errors.
    async fn check_response(&self, response: reqwest::Response) -> SupabaseResult<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!("Supabase request failed: {} - {}", status, body);
            return Err(SupabaseError::Supabase {
                status,
                message: body,
            });
        }
        Ok(response)
    }
}

impl std::fmt::Debug for SupabaseOutboxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseOutboxClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl OutboxQueue for SupabaseOutboxClient {
    async fn fetch_pending(&self, limit: usize, mode: FetchMode) -> PortResult<Vec<OutboxItem>> {
        let items = match mode {
            FetchMode::Claim => self.claim_pending_emails(limit).await?,
            FetchMode::Peek => self.peek_pending_emails(limit).await?,
        };
        Ok(items)
    }

    async fn mark_sent(&self, id: &str) -> PortResult<()> {
        Ok(self.mark_email_sent(id).await?)
    }

    async fn mark_error(&self, id: &str, message: &str) -> PortResult<()> {
        Ok(self.mark_email_error(id, message).await?)
    }

    async fn release(&self, id: &str) -> PortResult<()> {
        Ok(self.release_email(id).await?)
    }

    async fn stats(&self) -> PortResult<OutboxStats> {
        Ok(self.get_email_outbox_stats().await?)
    }
}

#[async_trait]
impl TemplateStore for SupabaseOutboxClient {
    async fn get_template(&self, name: &str) -> PortResult<Option<EmailTemplate>> {
        Ok(self.get_email_template(name).await?)
    }
}

#[async_trait]
impl AuditSink for SupabaseOutboxClient {
    async fn record_event(&self, event_type: &str, payload: serde_json::Value) -> PortResult<()> {
        Ok(self.insert_audit_event(event_type, &payload).await?)
    }
}
