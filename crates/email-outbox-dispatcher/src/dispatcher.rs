//! The dispatch loop.

use crate::config::EmailConfig;
use crate::error::{DispatchError, ItemError, RunResult};
use crate::model::{EmailTemplate, OutboxItem, OutgoingEmail};
use crate::outcome::{BlockReason, DispatchResult, ItemOutcome};
use crate::ports::{AuditSink, EmailProvider, FetchMode, NoopAuditSink, OutboxQueue, TemplateStore};
use crate::redact::redact_email;
use crate::render::render_template;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drains the outbox one batch at a time.
///
/// Holds no state between runs; every call to [`Dispatcher::dispatch`] builds
/// a fresh [`DispatchResult`].
pub struct Dispatcher {
    queue: Arc<dyn OutboxQueue>,
    templates: Arc<dyn TemplateStore>,
    provider: Arc<dyn EmailProvider>,
    audit: Arc<dyn AuditSink>,
}

/// Scratch state for a single run.
#[derive(Default)]
struct RunState {
    templates: HashMap<String, Option<EmailTemplate>>,
    provider_calls: u64,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn OutboxQueue>,
        templates: Arc<dyn TemplateStore>,
        provider: Arc<dyn EmailProvider>,
    ) -> Self {
        Self {
            queue,
            templates,
            provider,
            audit: Arc::new(NoopAuditSink),
        }
    }

    /// Record outcomes to `audit` (best effort).
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Process up to `batch_size` pending items under `config`.
    ///
    /// Per-item failures are recorded in the result. An error is returned only
    /// when the queue cannot be read.
    pub async fn dispatch(&self, batch_size: usize, config: &EmailConfig) -> RunResult<DispatchResult> {
        let fetch_mode = if config.is_dry_run() {
            FetchMode::Peek
        } else {
            FetchMode::Claim
        };

        let items = self
            .queue
            .fetch_pending(batch_size, fetch_mode)
            .await
            .map_err(DispatchError::Fetch)?;

        let mut result = DispatchResult::empty(config.mode);
        if items.is_empty() {
            debug!(mode = %config.mode, "Outbox empty, nothing to dispatch");
            return Ok(result);
        }

        result.fetched = items.len() as u64;
        info!(
            mode = %config.mode,
            fetched = items.len(),
            batch_size,
            "Dispatching outbox batch"
        );

        let mut run = RunState::default();
        for item in &items {
            let outcome = self.process_item(item, config, result.sent, &mut run).await;
            result.record(&item.id, outcome);
        }

        // Items were already sent and marked; a failed count must not hide that.
        result.remaining = match self.queue.stats().await {
            Ok(stats) => Some(stats.total_pending),
            Err(e) => {
                warn!(error = %e, "Failed to read outbox stats after run");
                None
            }
        };

        info!(
            mode = %config.mode,
            sent = result.sent,
            would_send = result.would_send,
            blocked = result.blocked,
            errors = result.errors,
            remaining = ?result.remaining,
            "Dispatch run complete"
        );

        Ok(result)
    }

    async fn process_item(
        &self,
        item: &OutboxItem,
        config: &EmailConfig,
        sent_so_far: u64,
        run: &mut RunState,
    ) -> Result<ItemOutcome, ItemError> {
        let template = match self.lookup_template(&item.template, run).await {
            Ok(template) => template,
            Err(e) => {
                if config.is_dry_run() {
                    debug!(item_id = %item.id, error = %e, "Dry run: item would fail");
                } else {
                    self.fail(item, &e).await;
                }
                return Err(e);
            }
        };

        if config.is_dry_run() {
            debug!(
                item_id = %item.id,
                to = %redact_email(&item.to_email),
                template = %item.template,
                "Dry run: would send"
            );
            return Ok(ItemOutcome::WouldSend);
        }

        if config.enforces_allowlist() && !config.is_allowlisted(&item.to_email) {
            return Ok(self.block(item, BlockReason::NotAllowlisted).await);
        }

        if sent_so_far >= u64::from(config.cap_max_per_run) {
            return Ok(self.block(item, BlockReason::CapReached).await);
        }

        let rendered = render_template(&template, item);
        let email = OutgoingEmail {
            from: config.from.clone(),
            to: item.to_email.clone(),
            subject: config.prefixed_subject(&rendered.subject),
            html: rendered.html,
            idempotency_key: item.idempotency_key.clone(),
        };

        if run.provider_calls > 0 && config.throttle_ms > 0 {
            tokio::time::sleep(config.throttle()).await;
        }
        run.provider_calls += 1;

        match self.provider.send(&email).await {
            Ok(receipt) => {
                if let Err(e) = self.queue.mark_sent(&item.id).await {
                    // The provider accepted it; the idempotency key covers a retry.
                    error!(item_id = %item.id, error = %e, "Failed to mark email sent");
                }
                info!(
                    item_id = %item.id,
                    to = %redact_email(&item.to_email),
                    provider_id = receipt.id.as_deref().unwrap_or("-"),
                    "Email sent"
                );
                self.record_audit(
                    "email.sent",
                    json!({
                        "id": item.id,
                        "template": item.template,
                        "idempotency_key": item.idempotency_key,
                        "provider_id": receipt.id,
                    }),
                )
                .await;
                Ok(ItemOutcome::Sent)
            }
            Err(e) => {
                let err = ItemError::Provider(e.to_string());
                self.fail(item, &err).await;
                Err(err)
            }
        }
    }

    /// Fetch a template once per run. Lookup failures are not cached.
    async fn lookup_template(&self, name: &str, run: &mut RunState) -> Result<EmailTemplate, ItemError> {
        let cached = match run.templates.get(name) {
            Some(cached) => cached.clone(),
            None => {
                let fetched = self
                    .templates
                    .get_template(name)
                    .await
                    .map_err(|e| ItemError::TemplateLookup(e.to_string()))?;
                run.templates.insert(name.to_string(), fetched.clone());
                fetched
            }
        };

        cached.ok_or_else(|| ItemError::TemplateMissing(name.to_string()))
    }

    async fn block(&self, item: &OutboxItem, reason: BlockReason) -> ItemOutcome {
        info!(
            item_id = %item.id,
            to = %redact_email(&item.to_email),
            reason = reason.as_str(),
            "Email blocked by policy"
        );

        if let Err(e) = self.queue.release(&item.id).await {
            warn!(item_id = %item.id, error = %e, "Failed to release blocked email");
        }

        self.record_audit(
            "email.blocked",
            json!({
                "id": item.id,
                "template": item.template,
                "reason": reason.as_str(),
            }),
        )
        .await;

        ItemOutcome::Blocked(reason)
    }

    async fn fail(&self, item: &OutboxItem, err: &ItemError) {
        let message = err.to_string();
        warn!(
            item_id = %item.id,
            to = %redact_email(&item.to_email),
            error = %message,
            "Email delivery failed"
        );

        if let Err(e) = self.queue.mark_error(&item.id, &message).await {
            error!(item_id = %item.id, error = %e, "Failed to mark email error");
        }

        self.record_audit(
            "email.error",
            json!({
                "id": item.id,
                "template": item.template,
                "error": message,
            }),
        )
        .await;
    }

    async fn record_audit(&self, event_type: &str, payload: serde_json::Value) {
        if let Err(e) = self.audit.record_event(event_type, payload).await {
            warn!(event_type, error = %e, "Failed to record audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchMode;
    use crate::error::{PortError, PortResult};
    use crate::model::{OutboxStats, ProviderReceipt};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockQueue {
        pending: Mutex<Vec<OutboxItem>>,
        fetch_modes: Mutex<Vec<FetchMode>>,
        sent: Mutex<Vec<String>>,
        errored: Mutex<Vec<(String, String)>>,
        released: Mutex<Vec<String>>,
        fail_fetch: bool,
        fail_stats: bool,
        fail_mark_sent: bool,
    }

    impl MockQueue {
        fn with_items(items: Vec<OutboxItem>) -> Self {
            Self {
                pending: Mutex::new(items),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl OutboxQueue for MockQueue {
        async fn fetch_pending(&self, limit: usize, mode: FetchMode) -> PortResult<Vec<OutboxItem>> {
            if self.fail_fetch {
                return Err(PortError::Transport("connection refused".to_string()));
            }
            self.fetch_modes.lock().unwrap().push(mode);
            let mut pending = self.pending.lock().unwrap();
            let take = limit.min(pending.len());
            Ok(match mode {
                FetchMode::Peek => pending[..take].to_vec(),
                FetchMode::Claim => pending.drain(..take).collect(),
            })
        }

        async fn mark_sent(&self, id: &str) -> PortResult<()> {
            if self.fail_mark_sent {
                return Err(PortError::Storage("disk full".to_string()));
            }
            self.sent.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn mark_error(&self, id: &str, message: &str) -> PortResult<()> {
            self.errored
                .lock()
                .unwrap()
                .push((id.to_string(), message.to_string()));
            Ok(())
        }

        async fn release(&self, id: &str) -> PortResult<()> {
            self.released.lock().unwrap().push(id.to_string());
            self.pending
                .lock()
                .unwrap()
                .push(OutboxItem::new(id, "released", "released@example.com", id));
            Ok(())
        }

        async fn stats(&self) -> PortResult<OutboxStats> {
            if self.fail_stats {
                return Err(PortError::Transport("timeout".to_string()));
            }
            Ok(OutboxStats {
                total_pending: self.pending.lock().unwrap().len() as u64,
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct MockTemplates {
        templates: HashMap<String, EmailTemplate>,
        lookups: Mutex<u32>,
        fail: bool,
    }

    impl MockTemplates {
        fn with(name: &str, template: EmailTemplate) -> Self {
            let mut templates = HashMap::new();
            templates.insert(name.to_string(), template);
            Self {
                templates,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl TemplateStore for MockTemplates {
        async fn get_template(&self, name: &str) -> PortResult<Option<EmailTemplate>> {
            *self.lookups.lock().unwrap() += 1;
            if self.fail {
                return Err(PortError::Upstream {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(self.templates.get(name).cloned())
        }
    }

    #[derive(Default)]
    struct MockProvider {
        sent: Mutex<Vec<OutgoingEmail>>,
        reject: HashSet<String>,
    }

    #[async_trait]
    impl EmailProvider for MockProvider {
        async fn send(&self, email: &OutgoingEmail) -> PortResult<ProviderReceipt> {
            if self.reject.contains(&email.to) {
                return Err(PortError::Upstream {
                    status: 422,
                    message: "invalid recipient".to_string(),
                });
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(email.clone());
            Ok(ProviderReceipt {
                id: Some(format!("msg-{}", sent.len())),
            })
        }
    }

    #[derive(Default)]
    struct RecordingAudit {
        events: Mutex<Vec<(String, serde_json::Value)>>,
        fail: bool,
    }

    #[async_trait]
    impl AuditSink for RecordingAudit {
        async fn record_event(&self, event_type: &str, payload: serde_json::Value) -> PortResult<()> {
            if self.fail {
                return Err(PortError::Storage("audit table missing".to_string()));
            }
            self.events
                .lock()
                .unwrap()
                .push((event_type.to_string(), payload));
            Ok(())
        }
    }

    fn welcome() -> EmailTemplate {
        EmailTemplate::new("Welcome {{first_name}}", "<p>Hi {{first_name}}</p>")
    }

    fn items(n: usize) -> Vec<OutboxItem> {
        (1..=n)
            .map(|i| {
                OutboxItem::new(
                    i.to_string(),
                    "welcome",
                    format!("user{i}@example.com"),
                    format!("welcome-{i}"),
                )
                .with_payload(json!({"first_name": format!("User{i}")}))
            })
            .collect()
    }

    fn full_config(allow: &[OutboxItem]) -> EmailConfig {
        EmailConfig {
            mode: DispatchMode::Full,
            ..Default::default()
        }
        .with_allowlist(allow.iter().map(|i| i.to_email.clone()))
    }

    struct Harness {
        queue: Arc<MockQueue>,
        templates: Arc<MockTemplates>,
        provider: Arc<MockProvider>,
        audit: Arc<RecordingAudit>,
    }

    impl Harness {
        fn new(queue: MockQueue, templates: MockTemplates, provider: MockProvider) -> Self {
            Self {
                queue: Arc::new(queue),
                templates: Arc::new(templates),
                provider: Arc::new(provider),
                audit: Arc::new(RecordingAudit::default()),
            }
        }

        fn dispatcher(&self) -> Dispatcher {
            Dispatcher::new(self.queue.clone(), self.templates.clone(), self.provider.clone())
                .with_audit_sink(self.audit.clone())
        }

        fn provider_calls(&self) -> usize {
            self.provider.sent.lock().unwrap().len()
        }
    }

    #[tokio::test]
    async fn test_cap_limits_sends_in_full_mode() {
        let batch = items(3);
        let mut config = full_config(&batch);
        config.cap_max_per_run = 1;
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        let result = h.dispatcher().dispatch(25, &config).await.unwrap();

        assert_eq!(result.sent, 1);
        assert_eq!(result.blocked, 2);
        assert_eq!(result.errors, 0);
        assert_eq!(h.provider_calls(), 1);
        assert_eq!(*h.queue.sent.lock().unwrap(), vec!["1".to_string()]);
        assert_eq!(*h.queue.released.lock().unwrap(), vec!["2".to_string(), "3".to_string()]);
        assert!(result
            .details
            .blocked
            .iter()
            .all(|b| b.reason == BlockReason::CapReached));
        // Released items are pending again.
        assert_eq!(result.remaining, Some(2));
    }

    #[tokio::test]
    async fn test_dry_run_never_calls_provider_or_mutates_queue() {
        let h = Harness::new(
            MockQueue::with_items(items(2)),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        let result = h
            .dispatcher()
            .dispatch(25, &EmailConfig::default())
            .await
            .unwrap();

        assert!(result.dry_run);
        assert_eq!(result.sent, 0);
        assert_eq!(result.would_send, 2);
        assert_eq!(result.errors, 0);
        assert_eq!(result.remaining, Some(2));
        assert_eq!(h.provider_calls(), 0);
        assert_eq!(*h.queue.fetch_modes.lock().unwrap(), vec![FetchMode::Peek]);
        assert!(h.queue.sent.lock().unwrap().is_empty());
        assert!(h.queue.released.lock().unwrap().is_empty());
        assert!(h.audit.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_template_fails_only_that_item() {
        let mut batch = items(2);
        batch[0].template = "does_not_exist".to_string();
        let config = full_config(&batch);
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        let result = h.dispatcher().dispatch(25, &config).await.unwrap();

        assert_eq!(result.errors, 1);
        assert_eq!(result.sent, 1);
        assert_eq!(result.details.failed[0].id, "1");
        assert_eq!(
            *h.queue.errored.lock().unwrap(),
            vec![("1".to_string(), "template not found: does_not_exist".to_string())]
        );
        assert_eq!(result.details.successful, vec!["2".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_template_in_dry_run_is_not_marked() {
        let mut batch = items(2);
        batch[1].template = "gone".to_string();
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        let result = h
            .dispatcher()
            .dispatch(25, &EmailConfig::default())
            .await
            .unwrap();

        assert_eq!(result.would_send, 1);
        assert_eq!(result.errors, 1);
        assert!(h.queue.errored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_queue_returns_zero_result_every_time() {
        let h = Harness::new(
            MockQueue::default(),
            MockTemplates::default(),
            MockProvider::default(),
        );
        let config = EmailConfig {
            mode: DispatchMode::Full,
            ..Default::default()
        };
        let dispatcher = h.dispatcher();

        for _ in 0..2 {
            let result = dispatcher.dispatch(25, &config).await.unwrap();
            assert_eq!(result, DispatchResult::empty(DispatchMode::Full));
        }
    }

    #[tokio::test]
    async fn test_non_allowlisted_recipients_are_blocked_and_released() {
        let batch = items(3);
        let config = full_config(&batch[..1]);
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        let result = h.dispatcher().dispatch(25, &config).await.unwrap();

        assert_eq!(result.sent, 1);
        assert_eq!(result.blocked, 2);
        let sent = h.provider.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "user1@example.com");
        assert!(result
            .details
            .blocked
            .iter()
            .all(|b| b.reason == BlockReason::NotAllowlisted));
        assert_eq!(h.queue.released.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_capped_mode_without_blocking_sends_outside_allowlist() {
        let batch = items(2);
        let mut config = full_config(&batch[1..]);
        config.mode = DispatchMode::Capped;
        config.block_non_allowlist = false;
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        let result = h.dispatcher().dispatch(25, &config).await.unwrap();

        assert_eq!(result.sent, 2);
        assert_eq!(result.blocked, 0);
        assert_eq!(h.queue.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_capped_mode_with_blocking_respects_allowlist() {
        let batch = items(2);
        let mut config = full_config(&batch[1..]);
        config.mode = DispatchMode::Capped;
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        let result = h.dispatcher().dispatch(25, &config).await.unwrap();

        assert_eq!(result.sent, 1);
        assert_eq!(result.blocked, 1);
        assert_eq!(result.details.blocked[0].id, "1");
    }

    #[tokio::test]
    async fn test_full_mode_without_blocking_sends_to_anyone() {
        let config = EmailConfig {
            mode: DispatchMode::Full,
            block_non_allowlist: false,
            ..Default::default()
        };
        let h = Harness::new(
            MockQueue::with_items(items(3)),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        let result = h.dispatcher().dispatch(25, &config).await.unwrap();

        assert_eq!(result.sent, 3);
        assert_eq!(result.remaining, Some(0));
    }

    #[tokio::test]
    async fn test_provider_failure_marks_error_and_continues() {
        let batch = items(3);
        let config = full_config(&batch);
        let provider = MockProvider {
            reject: ["user2@example.com".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            provider,
        );

        let result = h.dispatcher().dispatch(25, &config).await.unwrap();

        assert_eq!(result.sent, 2);
        assert_eq!(result.errors, 1);
        let errored = h.queue.errored.lock().unwrap();
        assert_eq!(errored[0].0, "2");
        assert_eq!(
            errored[0].1,
            "provider failure: upstream error: 422 - invalid recipient"
        );
    }

    #[tokio::test]
    async fn test_errors_do_not_consume_the_cap() {
        let batch = items(3);
        let mut config = full_config(&batch);
        config.cap_max_per_run = 1;
        let provider = MockProvider {
            reject: ["user1@example.com".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            provider,
        );

        let result = h.dispatcher().dispatch(25, &config).await.unwrap();

        assert_eq!(result.errors, 1);
        assert_eq!(result.sent, 1);
        assert_eq!(result.blocked, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_fatal() {
        let queue = MockQueue {
            fail_fetch: true,
            ..Default::default()
        };
        let h = Harness::new(queue, MockTemplates::default(), MockProvider::default());

        let err = h
            .dispatcher()
            .dispatch(25, &EmailConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_stats_failure_keeps_the_breakdown() {
        let batch = items(2);
        let config = full_config(&batch);
        let queue = MockQueue {
            pending: Mutex::new(batch),
            fail_stats: true,
            ..Default::default()
        };
        let h = Harness::new(
            queue,
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        let result = h.dispatcher().dispatch(25, &config).await.unwrap();

        assert_eq!(result.sent, 2);
        assert_eq!(result.details.successful, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(result.remaining, None);
        assert_eq!(h.queue.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_sent_failure_still_counts_as_sent() {
        let batch = items(1);
        let config = full_config(&batch);
        let queue = MockQueue {
            pending: Mutex::new(batch),
            fail_mark_sent: true,
            ..Default::default()
        };
        let h = Harness::new(
            queue,
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        let result = h.dispatcher().dispatch(25, &config).await.unwrap();

        assert_eq!(result.sent, 1);
        assert_eq!(result.errors, 0);
    }

    #[tokio::test]
    async fn test_template_lookup_failure_is_item_error() {
        let batch = items(2);
        let config = full_config(&batch);
        let templates = MockTemplates {
            fail: true,
            ..Default::default()
        };
        let h = Harness::new(MockQueue::with_items(batch), templates, MockProvider::default());

        let result = h.dispatcher().dispatch(25, &config).await.unwrap();

        assert_eq!(result.errors, 2);
        assert!(result.details.failed[0]
            .error
            .starts_with("template lookup failed:"));
        // Failed lookups are retried for the next item.
        assert_eq!(*h.templates.lookups.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_templates_are_fetched_once_per_run() {
        let batch = items(3);
        let config = full_config(&batch);
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        h.dispatcher().dispatch(25, &config).await.unwrap();

        assert_eq!(*h.templates.lookups.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sent_email_is_rendered_with_prefix_and_key() {
        let batch = items(1);
        let mut config = full_config(&batch);
        config.subject_prefix = "[STAGING]".to_string();
        config.from = "Events <events@example.com>".to_string();
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        h.dispatcher().dispatch(25, &config).await.unwrap();

        let sent = h.provider.sent.lock().unwrap();
        assert_eq!(sent[0].subject, "[STAGING] Welcome User1");
        assert_eq!(sent[0].html, "<p>Hi User1</p>");
        assert_eq!(sent[0].from, "Events <events@example.com>");
        assert_eq!(sent[0].idempotency_key, "welcome-1");
    }

    #[tokio::test]
    async fn test_audit_events_follow_outcomes() {
        let mut batch = items(3);
        batch[2].template = "missing".to_string();
        let mut config = full_config(&batch[..2]);
        config.cap_max_per_run = 1;
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        h.dispatcher().dispatch(25, &config).await.unwrap();

        let types: Vec<String> = h
            .audit
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect();
        assert_eq!(types, vec!["email.sent", "email.blocked", "email.error"]);
    }

    #[tokio::test]
    async fn test_audit_failure_is_swallowed() {
        let batch = items(2);
        let config = full_config(&batch);
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );
        let audit = Arc::new(RecordingAudit {
            fail: true,
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(h.queue.clone(), h.templates.clone(), h.provider.clone())
            .with_audit_sink(audit);

        let result = dispatcher.dispatch(25, &config).await.unwrap();

        assert_eq!(result.sent, 2);
    }

    #[tokio::test]
    async fn test_every_fetched_item_is_classified() {
        let mut batch = items(6);
        batch[0].template = "missing".to_string();
        let mut config = full_config(&batch[..4]);
        config.cap_max_per_run = 2;
        let provider = MockProvider {
            reject: ["user2@example.com".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            provider,
        );

        let result = h.dispatcher().dispatch(5, &config).await.unwrap();

        assert_eq!(result.fetched, 5);
        assert_eq!(result.classified(), result.fetched);
        assert!(result.sent <= u64::from(config.cap_max_per_run));
    }

    #[tokio::test]
    async fn test_batch_size_limits_fetch() {
        let config = EmailConfig {
            mode: DispatchMode::Full,
            block_non_allowlist: false,
            ..Default::default()
        };
        let h = Harness::new(
            MockQueue::with_items(items(5)),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        let result = h.dispatcher().dispatch(2, &config).await.unwrap();

        assert_eq!(result.fetched, 2);
        assert_eq!(result.remaining, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_provider_sends() {
        let batch = items(3);
        let mut config = full_config(&batch);
        config.throttle_ms = 200;
        let h = Harness::new(
            MockQueue::with_items(batch),
            MockTemplates::with("welcome", welcome()),
            MockProvider::default(),
        );

        let started = tokio::time::Instant::now();
        let result = h.dispatcher().dispatch(25, &config).await.unwrap();

        assert_eq!(result.sent, 3);
        assert!(started.elapsed() >= Duration::from_millis(400));
    }
}
