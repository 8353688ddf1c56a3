//! Outbox backend selection.

use anyhow::{bail, Context};
use dispatcher_config_and_utils::{Backend, Config, Paths};
use email_outbox_database::SqliteOutboxStore;
use email_outbox_dispatcher::{AuditSink, OutboxQueue, TemplateStore};
use std::sync::Arc;
use std::time::Duration;
use supabase_outbox_client::SupabaseOutboxClient;
use tracing::info;

/// The store that backs the queue, template and audit ports.
#[derive(Clone)]
pub enum OutboxBackend {
    Sqlite(Arc<SqliteOutboxStore>),
    Supabase(Arc<SupabaseOutboxClient>),
}

impl OutboxBackend {
    pub async fn connect(config: &Config, paths: &Paths) -> anyhow::Result<Self> {
        match config.backend {
            Backend::Sqlite => {
                let path = paths.database_file();
                let store =
                    SqliteOutboxStore::open(&path, Duration::from_secs(config.claim_ttl_secs))
                        .await
                        .with_context(|| format!("failed to open {}", path.display()))?;
                info!(path = %path.display(), "Using SQLite outbox");
                Ok(Self::Sqlite(Arc::new(store)))
            }
            Backend::Supabase => {
                let url = config.supabase_url()?;
                let key = config
                    .supabase_service_role_key
                    .as_deref()
                    .context("SUPABASE_SERVICE_ROLE_KEY is not set")?;
                let client = SupabaseOutboxClient::with_timeout(
                    url.as_str(),
                    key,
                    Duration::from_secs(config.request_timeout_secs),
                )?;
                info!(host = url.host_str().unwrap_or_default(), "Using Supabase outbox");
                Ok(Self::Supabase(Arc::new(client)))
            }
        }
    }

    pub fn queue(&self) -> Arc<dyn OutboxQueue> {
        match self {
            Self::Sqlite(store) => store.clone(),
            Self::Supabase(client) => client.clone(),
        }
    }

    pub fn templates(&self) -> Arc<dyn TemplateStore> {
        match self {
            Self::Sqlite(store) => store.clone(),
            Self::Supabase(client) => client.clone(),
        }
    }

    pub fn audit(&self) -> Arc<dyn AuditSink> {
        match self {
            Self::Sqlite(store) => store.clone(),
            Self::Supabase(client) => client.clone(),
        }
    }

    /// The local store, for commands that write rows directly.
    pub fn sqlite(&self) -> anyhow::Result<&SqliteOutboxStore> {
        match self {
            Self::Sqlite(store) => Ok(store),
            Self::Supabase(_) => {
                bail!("this command needs the sqlite backend; the Supabase outbox is written by the registration flow")
            }
        }
    }
}
