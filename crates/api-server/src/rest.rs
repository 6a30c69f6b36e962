//! Shared REST state, error mapping, and operational endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use drip_channels::SmsProvider;
use drip_core::DripError;
use drip_engine::{Dispatcher, EnrollmentService, FolderWatcher};

/// Maximum length of tenant, lead, campaign and folder ids.
pub const MAX_FIELD_LEN: usize = 256;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub enrollments: EnrollmentService,
    pub dispatcher: Arc<Dispatcher>,
    pub folder_watcher: Arc<FolderWatcher>,
    /// Set when the simulated SMS transport is in use, to accept its
    /// delivery callbacks.
    pub sms: Option<Arc<SmsProvider>>,
    pub cron_secret: Option<String>,
    pub node_id: String,
    pub start_time: Instant,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
        }
    }
}

/// Engine error carried to the HTTP boundary.
#[derive(Debug)]
pub struct ApiError(pub DripError);

impl From<DripError> for ApiError {
    fn from(e: DripError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            DripError::DuplicateEnrollment(_) => (StatusCode::CONFLICT, "duplicate_enrollment"),
            DripError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            DripError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            DripError::CampaignUnavailable(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "campaign_unavailable")
            }
            DripError::StaleClaim(_) | DripError::LockContention(_) => {
                (StatusCode::CONFLICT, "contention")
            }
            DripError::Send(_) => (StatusCode::BAD_GATEWAY, "send_failed"),
            DripError::Config(_)
            | DripError::Store(_)
            | DripError::Lock(_)
            | DripError::Serialization(_)
            | DripError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
            metrics::counter!("api.errors").increment(1);
            "Internal processing error".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

/// 400 with a validation message.
pub fn bad_request(message: impl Into<String>) -> Response {
    metrics::counter!("api.validation_errors").increment(1);
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new("invalid_request", message)),
    )
        .into_response()
}

/// Reject empty or oversized identifiers.
pub fn validate_id(name: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("'{name}' must not be empty"));
    }
    if value.len() > MAX_FIELD_LEN {
        return Err(format!("'{name}' exceeds maximum length"));
    }
    Ok(())
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — the engine is wired before the router is built, so a
/// serving process is ready.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
