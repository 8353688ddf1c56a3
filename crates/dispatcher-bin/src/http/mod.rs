//! HTTP surface: the dispatch trigger, queue stats and a health check.

mod auth;
mod error;

pub use error::{AppError, AppResult};

use crate::app::AppState;
use axum::{
    extract::{Query, State},
    middleware,
    routing::get,
    Json, Router,
};
use email_outbox_dispatcher::{DispatchResult, OutboxStats};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Query parameters accepted by the dispatch route.
#[derive(Debug, Default, Deserialize)]
pub struct DispatchQuery {
    dry_run: Option<String>,
    #[serde(rename = "batchSize", alias = "batch_size")]
    batch_size: Option<String>,
}

impl DispatchQuery {
    fn dry_run(&self) -> bool {
        self.dry_run.as_deref().is_some_and(parse_flag)
    }

    fn batch_size(&self) -> AppResult<Option<usize>> {
        let Some(raw) = self.batch_size.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let requested: i64 = raw
            .parse()
            .map_err(|_| AppError::bad_request(format!("invalid batchSize: {raw}")))?;
        // Clamped to the configured maximum by the caller.
        Ok(Some(usize::try_from(requested.max(1)).unwrap_or(usize::MAX)))
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/email/dispatch", get(dispatch).post(dispatch))
        .route("/api/email/stats", get(stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_secret));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&state.config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "mailroom listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("mailroom stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn dispatch(
    State(state): State<AppState>,
    Query(query): Query<DispatchQuery>,
) -> AppResult<Json<DispatchResult>> {
    let batch_size = query.batch_size()?;
    let result = state.run_dispatch(batch_size, query.dry_run()).await?;
    Ok(Json(result))
}

async fn stats(State(state): State<AppState>) -> AppResult<Json<OutboxStats>> {
    Ok(Json(state.stats().await?))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use dispatcher_config_and_utils::Config;
    use email_outbox_database::{NewOutboxEmail, SqliteOutboxStore};
    use email_outbox_dispatcher::{
        DispatchMode, Dispatcher, EmailProvider, FetchMode, OutboxItem, OutboxQueue,
        OutgoingEmail, PortError, PortResult, ProviderReceipt,
    };
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    const SECRET: &str = "s3cret";

    #[derive(Default)]
    struct RecordingProvider {
        sent: Mutex<Vec<OutgoingEmail>>,
    }

    #[async_trait]
    impl EmailProvider for RecordingProvider {
        async fn send(&self, email: &OutgoingEmail) -> PortResult<ProviderReceipt> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(ProviderReceipt::default())
        }
    }

    /// SQLite queue whose stats query always fails.
    struct StatsUnavailable(Arc<SqliteOutboxStore>);

    #[async_trait]
    impl OutboxQueue for StatsUnavailable {
        async fn fetch_pending(&self, limit: usize, mode: FetchMode) -> PortResult<Vec<OutboxItem>> {
            self.0.fetch_pending(limit, mode).await
        }

        async fn mark_sent(&self, id: &str) -> PortResult<()> {
            self.0.mark_sent(id).await
        }

        async fn mark_error(&self, id: &str, message: &str) -> PortResult<()> {
            self.0.mark_error(id, message).await
        }

        async fn release(&self, id: &str) -> PortResult<()> {
            self.0.release(id).await
        }

        async fn stats(&self) -> PortResult<OutboxStats> {
            Err(PortError::Transport("connection reset".to_string()))
        }
    }

    struct TestApp {
        _dir: TempDir,
        router: Router,
        provider: Arc<RecordingProvider>,
    }

    async fn create_test_app(secret: Option<&str>, pending: usize) -> TestApp {
        create_test_app_with(secret, pending, false).await
    }

    async fn create_test_app_with(secret: Option<&str>, pending: usize, stats_down: bool) -> TestApp {
        let dir = tempdir().unwrap();
        let store = SqliteOutboxStore::open(&dir.path().join("outbox.db"), Duration::from_secs(300))
            .await
            .unwrap();
        store
            .upsert_template("welcome", "Welcome {{first_name}}", "<p>Hi {{first_name}}</p>")
            .await
            .unwrap();
        for i in 0..pending {
            store
                .enqueue(
                    NewOutboxEmail::new("welcome", format!("u{i}@example.com"), format!("k{i}"))
                        .with_payload(json!({"first_name": format!("U{i}")})),
                )
                .await
                .unwrap();
        }

        let mut config = Config::default();
        config.dispatch_secret = secret.map(str::to_string);
        config.email.mode = DispatchMode::Full;
        config.email.block_non_allowlist = false;
        config.max_batch_size = 2;
        config.default_batch_size = 2;

        let store = Arc::new(store);
        let queue: Arc<dyn OutboxQueue> = if stats_down {
            Arc::new(StatsUnavailable(store.clone()))
        } else {
            store.clone()
        };
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher = Dispatcher::new(queue.clone(), store.clone(), provider.clone())
            .with_audit_sink(store.clone());
        let state = AppState::new(Arc::new(config), Arc::new(dispatcher), queue);

        TestApp {
            _dir: dir,
            router: router(state),
            provider,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn authed(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {SECRET}"))
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" yes "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("on"));
    }

    #[test]
    fn test_batch_size_parsing() {
        let query = |raw: &str| DispatchQuery {
            batch_size: Some(raw.to_string()),
            ..Default::default()
        };
        assert_eq!(query("10").batch_size().unwrap(), Some(10));
        assert_eq!(query("0").batch_size().unwrap(), Some(1));
        assert_eq!(query("-4").batch_size().unwrap(), Some(1));
        assert_eq!(query(" ").batch_size().unwrap(), None);
        assert!(query("ten").batch_size().is_err());
    }

    #[tokio::test]
    async fn test_health_needs_no_credential() {
        let app = create_test_app(Some(SECRET), 0).await;
        let (status, body) = send(&app.router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_dispatch_rejects_missing_credential() {
        let app = create_test_app(Some(SECRET), 1).await;
        let (status, body) = send(&app.router, get("/api/email/dispatch")).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["status"], 401);
        assert!(app.provider.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_rejects_wrong_secret() {
        let app = create_test_app(Some(SECRET), 1).await;
        let request = Request::builder()
            .uri("/api/email/dispatch")
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(Body::empty())
            .unwrap();

        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app.router, get("/api/email/dispatch?secret=nope")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unconfigured_secret_rejects_everything() {
        let app = create_test_app(None, 1).await;
        let (status, _) = send(&app.router, authed(Method::GET, "/api/email/dispatch")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_dispatch_dry_run_with_query_secret() {
        let app = create_test_app(Some(SECRET), 2).await;
        let (status, body) = send(
            &app.router,
            get("/api/email/dispatch?secret=s3cret&dry_run=yes"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "dry_run");
        assert_eq!(body["dry_run"], true);
        assert_eq!(body["would_send"], 2);
        assert_eq!(body["sent"], 0);
        assert_eq!(body["remaining"], 2);
        assert!(app.provider.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_post_sends_batch() {
        let app = create_test_app(Some(SECRET), 3).await;
        let (status, body) = send(
            &app.router,
            authed(Method::POST, "/api/email/dispatch?batchSize=1"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "full");
        assert_eq!(body["fetched"], 1);
        assert_eq!(body["sent"], 1);
        assert_eq!(body["remaining"], 2);
        assert_eq!(body["details"]["successful"].as_array().unwrap().len(), 1);

        let sent = app.provider.sent.lock().unwrap();
        assert_eq!(sent[0].to, "u0@example.com");
        assert_eq!(sent[0].subject, "Welcome U0");
    }

    #[tokio::test]
    async fn test_batch_size_alias_is_clamped() {
        let app = create_test_app(Some(SECRET), 3).await;
        let (status, body) = send(
            &app.router,
            authed(Method::GET, "/api/email/dispatch?batch_size=50"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fetched"], 2);
        assert_eq!(body["remaining"], 1);
    }

    #[tokio::test]
    async fn test_invalid_batch_size_is_bad_request() {
        let app = create_test_app(Some(SECRET), 1).await;
        let (status, body) = send(
            &app.router,
            authed(Method::GET, "/api/email/dispatch?batchSize=lots"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["status"], 400);
    }

    #[tokio::test]
    async fn test_empty_queue_returns_zeroed_result() {
        let app = create_test_app(Some(SECRET), 0).await;
        let (status, body) = send(&app.router, authed(Method::GET, "/api/email/dispatch")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fetched"], 0);
        assert_eq!(body["remaining"], 0);
    }

    #[tokio::test]
    async fn test_dispatch_reports_sends_when_stats_fail() {
        let app = create_test_app_with(Some(SECRET), 2, true).await;
        let (status, body) = send(&app.router, authed(Method::POST, "/api/email/dispatch")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sent"], 2);
        assert_eq!(body["details"]["successful"].as_array().unwrap().len(), 2);
        assert!(body["remaining"].is_null());
        assert_eq!(app.provider.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stats_route() {
        let app = create_test_app(Some(SECRET), 2).await;

        let (status, _) = send(&app.router, get("/api/email/stats")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app.router, authed(Method::GET, "/api/email/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_pending"], 2);
    }
}
