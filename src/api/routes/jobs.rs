//! Per-job control handlers.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::api::AppState;
use crate::api::error_response::error_response;
use crate::types::{Identity, JobId};

/// PATCH /jobs/{id}/cancel - Cancel a job
#[utoipa::path(
    patch,
    path = "/jobs/{id}/cancel",
    tag = "jobs",
    params(("id" = i64, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job canceled", body = crate::types::JobInfo),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job is in a terminal state")
    )
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Response {
    match state.downloader.cancel_job(JobId::new(id), identity).await {
        Ok(row) => (StatusCode::OK, Json(json!({"data": row.to_info()}))).into_response(),
        Err(e) => error_response(e),
    }
}

/// PATCH /jobs/{id}/pause - Pause a downloading job
#[utoipa::path(
    patch,
    path = "/jobs/{id}/pause",
    tag = "jobs",
    params(("id" = i64, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job paused", body = crate::types::JobInfo),
        (status = 409, description = "Job is not downloading")
    )
)]
pub async fn pause_job(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Response {
    match state.downloader.pause_job(JobId::new(id), identity).await {
        Ok(row) => (StatusCode::OK, Json(json!({"data": row.to_info()}))).into_response(),
        Err(e) => error_response(e),
    }
}

/// PATCH /jobs/{id}/resume - Resume a paused job
#[utoipa::path(
    patch,
    path = "/jobs/{id}/resume",
    tag = "jobs",
    params(("id" = i64, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job resumed", body = crate::types::JobInfo),
        (status = 409, description = "Job is not paused")
    )
)]
pub async fn resume_job(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Response {
    match state.downloader.resume_job(JobId::new(id), identity).await {
        Ok(row) => (StatusCode::OK, Json(json!({"data": row.to_info()}))).into_response(),
        Err(e) => error_response(e),
    }
}

/// Body of a priority change
#[derive(Debug, Deserialize, ToSchema)]
pub struct PriorityRequest {
    /// New priority (lower = earlier)
    pub priority: i32,
}

/// PATCH /jobs/{id}/priority - Change a queued job's priority
#[utoipa::path(
    patch,
    path = "/jobs/{id}/priority",
    tag = "jobs",
    params(("id" = i64, Path, description = "Job id")),
    request_body = PriorityRequest,
    responses(
        (status = 200, description = "Priority changed", body = crate::types::JobInfo),
        (status = 409, description = "Job is not queued")
    )
)]
pub async fn set_job_priority(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(body): Json<PriorityRequest>,
) -> Response {
    match state
        .downloader
        .set_job_priority(JobId::new(id), identity, body.priority)
        .await
    {
        Ok(row) => (StatusCode::OK, Json(json!({"data": row.to_info()}))).into_response(),
        Err(e) => error_response(e),
    }
}

/// DELETE /jobs/{id} - Delete a job (and its library file when completed)
#[utoipa::path(
    delete,
    path = "/jobs/{id}",
    tag = "jobs",
    params(("id" = i64, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job deleted"),
        (status = 404, description = "Job not found")
    )
)]
pub async fn delete_job(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Response {
    match state.downloader.delete_job(JobId::new(id), identity).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"data": {"deleted": true}})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}
