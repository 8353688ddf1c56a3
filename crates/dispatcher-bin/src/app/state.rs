//! Shared server state.

use dispatcher_config_and_utils::Config;
use email_outbox_dispatcher::{
    DispatchMode, DispatchResult, Dispatcher, OutboxQueue, OutboxStats, PortResult, RunResult,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// State shared by the HTTP handlers and the one-shot CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    pub queue: Arc<dyn OutboxQueue>,
    /// Held for the duration of a run so overlapping triggers queue up.
    run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: Arc<Config>, dispatcher: Arc<Dispatcher>, queue: Arc<dyn OutboxQueue>) -> Self {
        Self {
            config,
            dispatcher,
            queue,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run one dispatch. `force_dry_run` downgrades the configured mode for
    /// this run only.
    pub async fn run_dispatch(
        &self,
        batch_size: Option<usize>,
        force_dry_run: bool,
    ) -> RunResult<DispatchResult> {
        let mut email = self.config.email.clone();
        if force_dry_run {
            email.mode = DispatchMode::DryRun;
        }
        let batch_size = self.config.batch_size(batch_size);

        let _guard = self.run_lock.lock().await;
        self.dispatcher.dispatch(batch_size, &email).await
    }

    pub async fn stats(&self) -> PortResult<OutboxStats> {
        self.queue.stats().await
    }
}
