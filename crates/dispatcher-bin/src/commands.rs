//! CLI command handlers.

use crate::app::{build_state, OutboxBackend};
use crate::http;
use anyhow::{bail, Context};
use dispatcher_config_and_utils::{Config, Paths};
use email_outbox_database::NewOutboxEmail;
use email_outbox_dispatcher::redact_email;
use std::path::Path;
use tracing::info;

pub async fn serve(config: Config, paths: &Paths) -> anyhow::Result<()> {
    if config.dispatch_secret.is_none() {
        bail!("DISPATCH_SECRET must be set to serve the dispatch endpoint");
    }
    let state = build_state(config, paths).await?;
    http::serve(state).await
}

pub async fn dispatch(
    config: Config,
    paths: &Paths,
    batch_size: Option<usize>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let state = build_state(config, paths).await?;
    let result = state.run_dispatch(batch_size, dry_run).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub async fn enqueue(
    config: Config,
    paths: &Paths,
    template: String,
    to: String,
    idempotency_key: String,
    payload: Option<&str>,
) -> anyhow::Result<()> {
    let backend = OutboxBackend::connect(&config, paths).await?;
    let store = backend.sqlite()?;

    let mut email = NewOutboxEmail::new(template, to, idempotency_key);
    if let Some(raw) = payload {
        let value: serde_json::Value =
            serde_json::from_str(raw).context("--payload is not valid JSON")?;
        if !value.is_object() {
            bail!("--payload must be a JSON object");
        }
        email = email.with_payload(value);
    }

    let recipient = redact_email(&email.to_email);
    let key = email.idempotency_key.clone();
    match store.enqueue(email).await? {
        Some(id) => {
            info!(id = %id, to = %recipient, "Queued email");
            println!("{id}");
        }
        None => println!("already queued: {key}"),
    }
    Ok(())
}

pub async fn set_template(
    config: Config,
    paths: &Paths,
    name: &str,
    subject: &str,
    html_file: &Path,
) -> anyhow::Result<()> {
    let html = std::fs::read_to_string(html_file)
        .with_context(|| format!("failed to read {}", html_file.display()))?;

    let backend = OutboxBackend::connect(&config, paths).await?;
    backend.sqlite()?.upsert_template(name, subject, &html).await?;

    info!(name = %name, "Template saved");
    println!("saved template {name}");
    Ok(())
}

pub async fn stats(config: Config, paths: &Paths) -> anyhow::Result<()> {
    let backend = OutboxBackend::connect(&config, paths).await?;
    let stats = backend.queue().stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
