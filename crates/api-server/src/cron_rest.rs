//! Cron trigger endpoints. An external scheduler POSTs here once a minute;
//! the job locks make concurrent or repeated triggers harmless.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use crate::rest::{ApiError, AppState, ErrorResponse};

/// Pull the presented cron secret from, in order: a bearer token, the
/// `x-cron-key` or `x-cron-token` header, or the `token` query parameter.
fn presented_token<'a>(headers: &'a HeaderMap, query: &'a HashMap<String, String>) -> Option<&'a str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    bearer
        .or_else(|| headers.get("x-cron-key").and_then(|v| v.to_str().ok()))
        .or_else(|| headers.get("x-cron-token").and_then(|v| v.to_str().ok()))
        .or_else(|| query.get("token").map(String::as_str))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// `None` when the caller may proceed, else the 401 response.
fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Option<Response> {
    let secret = state.cron_secret.as_deref()?;
    match presented_token(headers, query) {
        Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => None,
        _ => {
            warn!("Rejected cron trigger with missing or wrong secret");
            metrics::counter!("api.cron.unauthorized").increment(1);
            Some(
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse::new("unauthorized", "invalid cron secret")),
                )
                    .into_response(),
            )
        }
    }
}

/// POST /v1/cron/drip-dispatch
pub async fn drip_dispatch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    if let Some(denied) = authorize(&state, &headers, &query) {
        return Ok(denied);
    }
    let report = state.dispatcher.tick().await?;
    Ok(Json(report).into_response())
}

/// POST /v1/cron/folder-watch
pub async fn folder_watch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    if let Some(denied) = authorize(&state, &headers, &query) {
        return Ok(denied);
    }
    let report = state.folder_watcher.tick().await?;
    Ok(Json(report).into_response())
}
