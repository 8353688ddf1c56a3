//! Shared-secret authentication for the dispatch routes.
//!
//! The caller presents the secret either as `Authorization: Bearer <secret>`
//! or as a `?secret=` query parameter (for schedulers that cannot set
//! headers). Without a configured secret every request is rejected.

use super::error::AppError;
use crate::app::AppState;
use axum::{
    extract::{Query, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use constant_time_eq::constant_time_eq;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct SecretQuery {
    secret: Option<String>,
}

pub async fn require_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.dispatch_secret.as_deref() else {
        warn!("Rejecting request: DISPATCH_SECRET is not configured");
        return Err(AppError::unauthorized("unauthorized"));
    };

    let presented = extract_bearer_token(&request).or_else(|| extract_query_secret(&request));
    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejecting request: bad credential");
            Err(AppError::unauthorized("unauthorized"))
        }
        None => Err(AppError::unauthorized("unauthorized")),
    }
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())?;

    auth_header
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn extract_query_secret(request: &Request) -> Option<String> {
    Query::<SecretQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(query)| query.secret)
        .filter(|secret| !secret.is_empty())
}
