//! Email provider construction.

use anyhow::bail;
use async_trait::async_trait;
use dispatcher_config_and_utils::Config;
use email_outbox_dispatcher::{EmailProvider, OutgoingEmail, PortError, PortResult, ProviderReceipt};
use resend_client::ResendClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Stand-in provider used when no API key is configured and the configured
/// mode never sends. Every call fails.
#[derive(Debug, Default)]
pub struct UnconfiguredProvider;

#[async_trait]
impl EmailProvider for UnconfiguredProvider {
    async fn send(&self, _email: &OutgoingEmail) -> PortResult<ProviderReceipt> {
        Err(PortError::Transport("RESEND_API_KEY is not set".to_string()))
    }
}

/// Build the Resend provider. A missing key is only accepted in dry-run mode.
pub fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn EmailProvider>> {
    match config.resend_api_key.as_deref() {
        Some(key) => {
            let client = ResendClient::new(key)
                .with_api_url(config.resend_api_url()?.as_str())
                .with_timeout(Duration::from_secs(config.request_timeout_secs))?;
            Ok(Arc::new(client))
        }
        None if config.email.is_dry_run() => {
            warn!("RESEND_API_KEY is not set; only dry runs are possible");
            Ok(Arc::new(UnconfiguredProvider))
        }
        None => bail!(
            "RESEND_API_KEY is required when the email mode is {}",
            config.email.mode
        ),
    }
}
