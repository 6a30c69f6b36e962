//! Enrollment and folder-watch REST endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use drip_core::types::{EnrollmentSource, NewEnrollment, StartMode};

use crate::rest::{bad_request, validate_id, ApiError, AppState};

/// Maximum leads accepted by one bulk import.
pub const MAX_BULK_LEADS: usize = 5_000;

#[derive(Debug, Deserialize)]
pub struct CreateEnrollmentRequest {
    pub tenant_id: String,
    pub lead_id: String,
    pub campaign_id: String,
    #[serde(default)]
    pub start_mode: StartMode,
}

#[derive(Debug, Deserialize)]
pub struct BulkEnrollmentRequest {
    pub tenant_id: String,
    pub campaign_id: String,
    pub lead_ids: Vec<String>,
    #[serde(default)]
    pub start_mode: StartMode,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderWatchRequest {
    pub tenant_id: String,
    pub folder_id: String,
    pub campaign_id: String,
    #[serde(default)]
    pub start_mode: StartMode,
}

/// POST /v1/enrollments — enroll one lead (201, 409 if already live).
pub async fn create_enrollment(
    State(state): State<AppState>,
    Json(request): Json<CreateEnrollmentRequest>,
) -> Result<Response, ApiError> {
    let checks = [
        validate_id("tenant_id", &request.tenant_id),
        validate_id("lead_id", &request.lead_id),
        validate_id("campaign_id", &request.campaign_id),
    ];
    if let Some(Err(msg)) = checks.into_iter().find(Result::is_err) {
        warn!(error = %msg, "Enrollment request validation failed");
        return Ok(bad_request(msg));
    }

    let enrollment = state
        .enrollments
        .create(NewEnrollment {
            tenant_id: request.tenant_id,
            lead_id: request.lead_id,
            campaign_id: request.campaign_id,
            source: EnrollmentSource::Manual,
            start_mode: request.start_mode,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(enrollment)).into_response())
}

/// POST /v1/enrollments/bulk — sheet import; duplicates are counted, not errors.
pub async fn bulk_enroll(
    State(state): State<AppState>,
    Json(request): Json<BulkEnrollmentRequest>,
) -> Result<Response, ApiError> {
    if let Err(msg) = validate_id("tenant_id", &request.tenant_id)
        .and_then(|_| validate_id("campaign_id", &request.campaign_id))
    {
        return Ok(bad_request(msg));
    }
    if request.lead_ids.is_empty() {
        return Ok(bad_request("'lead_ids' must not be empty"));
    }
    if request.lead_ids.len() > MAX_BULK_LEADS {
        return Ok(bad_request(format!(
            "'lead_ids' exceeds {MAX_BULK_LEADS} entries"
        )));
    }
    if let Some(Err(msg)) = request
        .lead_ids
        .iter()
        .map(|lead| validate_id("lead_ids[]", lead))
        .find(Result::is_err)
    {
        return Ok(bad_request(msg));
    }

    let report = state
        .enrollments
        .bulk_enroll(
            &request.tenant_id,
            &request.campaign_id,
            &request.lead_ids,
            request.start_mode,
        )
        .await?;
    Ok(Json(report).into_response())
}

/// GET /v1/enrollments/{id}
pub async fn get_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    Ok(Json(state.enrollments.get(id).await?).into_response())
}

/// GET /v1/tenants/{tenant_id}/enrollments
pub async fn list_tenant_enrollments(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(Json(state.enrollments.list_for_tenant(&tenant_id).await?).into_response())
}

/// POST /v1/enrollments/{id}/pause
pub async fn pause_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    Ok(Json(state.enrollments.pause(id).await?).into_response())
}

/// POST /v1/enrollments/{id}/resume — also revives an errored enrollment.
pub async fn resume_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    Ok(Json(state.enrollments.resume(id).await?).into_response())
}

/// POST /v1/enrollments/{id}/cancel
pub async fn cancel_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    Ok(Json(state.enrollments.cancel(id).await?).into_response())
}

/// POST /v1/folder-watches
pub async fn create_folder_watch(
    State(state): State<AppState>,
    Json(request): Json<CreateFolderWatchRequest>,
) -> Result<Response, ApiError> {
    let checks = [
        validate_id("tenant_id", &request.tenant_id),
        validate_id("folder_id", &request.folder_id),
        validate_id("campaign_id", &request.campaign_id),
    ];
    if let Some(Err(msg)) = checks.into_iter().find(Result::is_err) {
        return Ok(bad_request(msg));
    }

    let watch = state
        .enrollments
        .create_watch(
            &request.tenant_id,
            &request.folder_id,
            &request.campaign_id,
            request.start_mode,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(watch)).into_response())
}

/// GET /v1/folder-watches/{id}
pub async fn get_folder_watch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    Ok(Json(state.enrollments.get_watch(id).await?).into_response())
}
