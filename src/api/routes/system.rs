//! System handlers: health, storage, notifications, OpenAPI.

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use crate::api::AppState;
use crate::api::error_response::error_response;
use crate::types::Identity;
use crate::utils::disk_usage;

/// GET /system/health - Health check (unauthenticated)
#[utoipa::path(
    get,
    path = "/system/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy")
    )
)]
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /system/storage - Mount usage of the downloads and library paths
#[utoipa::path(
    get,
    path = "/system/storage",
    tag = "system",
    responses(
        (status = 200, description = "Mount usage report"),
        (status = 500, description = "Disk space check failed")
    )
)]
pub async fn system_storage(State(state): State<AppState>) -> Response {
    let config = state.downloader.get_config();

    let mut mounts = serde_json::Map::new();
    for (name, path) in [
        ("downloads", &config.paths.downloads),
        ("library", &config.paths.library),
    ] {
        match disk_usage(path) {
            Ok(usage) => {
                mounts.insert(
                    name.to_string(),
                    json!({
                        "path": path,
                        "total_bytes": usage.total_bytes,
                        "available_bytes": usage.available_bytes,
                        "used_bytes": usage.used_bytes(),
                        "percent_used": usage.percent_used(),
                    }),
                );
            }
            Err(e) => {
                return error_response(crate::error::Error::DiskSpaceCheckFailed(format!(
                    "{}: {e}",
                    path.display()
                )));
            }
        }
    }

    (StatusCode::OK, Json(json!({"data": mounts}))).into_response()
}

/// Query parameters for the notification listing
#[derive(Debug, Deserialize)]
pub struct NotificationsQuery {
    /// Maximum entries to return (default 50)
    #[serde(default)]
    pub limit: Option<i64>,
}

/// GET /notifications - The caller's recent notifications
#[utoipa::path(
    get,
    path = "/notifications",
    tag = "system",
    responses(
        (status = 200, description = "Recent notifications, newest first")
    )
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<NotificationsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    match state
        .downloader
        .db
        .recent_notifications(identity.user_id, limit)
        .await
    {
        Ok(rows) => {
            let notifications: Vec<_> = rows
                .into_iter()
                .map(|row| {
                    json!({
                        "id": row.id,
                        "kind": row.kind,
                        "payload": row
                            .payload
                            .as_deref()
                            .and_then(|p| serde_json::from_str::<serde_json::Value>(p).ok()),
                        "created_at": row.created_at,
                    })
                })
                .collect();
            (StatusCode::OK, Json(json!({"data": notifications}))).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI 3.1 specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}
