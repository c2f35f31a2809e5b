//! Error-to-response conversion for route handlers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::{ApiError, Error, ToHttpStatus};

/// Render a crate error as its HTTP status plus the standard error envelope
pub fn error_response(error: Error) -> Response {
    let status = StatusCode::from_u16(error.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        tracing::error!(error = %error, "request failed");
    }

    let api: ApiError = error.into();
    (status, Json(api)).into_response()
}

/// 403 response for RBAC denials raised directly in handlers
pub fn forbidden(message: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(ApiError::forbidden(message)),
    )
        .into_response()
}

/// 429 response for rate-limited inserts
pub fn too_many_requests(wait_seconds: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ApiError::with_details(
            "rate_limited",
            "too many submissions, slow down",
            serde_json::json!({"retry_after_seconds": wait_seconds}),
        )),
    )
        .into_response()
}
