//! Wiring between configuration, storage backends and the dispatcher.

mod backend;
mod provider;
mod state;

pub use backend::OutboxBackend;
pub use provider::build_provider;
pub use state::AppState;

use dispatcher_config_and_utils::{Config, Paths};
use email_outbox_dispatcher::Dispatcher;
use std::sync::Arc;
use tracing::info;

/// Connect the configured backend and assemble the shared state.
pub async fn build_state(config: Config, paths: &Paths) -> anyhow::Result<AppState> {
    let backend = OutboxBackend::connect(&config, paths).await?;
    let provider = build_provider(&config)?;

    let dispatcher = Dispatcher::new(backend.queue(), backend.templates(), provider)
        .with_audit_sink(backend.audit());

    info!(
        backend = %config.backend,
        mode = %config.email.mode,
        allowlist = config.email.allowlist.len(),
        cap = config.email.cap_max_per_run,
        "Dispatcher ready"
    );

    Ok(AppState::new(Arc::new(config), Arc::new(dispatcher), backend.queue()))
}
