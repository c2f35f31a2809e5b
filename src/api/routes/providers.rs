//! Provider administration handlers (admin-only).

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::api::AppState;
use crate::api::error_response::{error_response, forbidden};
use crate::types::Identity;

/// GET /providers - List configured providers with their coordination state
#[utoipa::path(
    get,
    path = "/providers",
    tag = "providers",
    responses(
        (status = 200, description = "Provider list"),
        (status = 403, description = "Admin only")
    )
)]
pub async fn list_providers(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Response {
    if !identity.is_admin() {
        return forbidden("provider administration is admin-only");
    }

    let rows = match state.downloader.db.list_providers().await {
        Ok(rows) => rows,
        Err(e) => return error_response(e),
    };

    let mut providers = Vec::with_capacity(rows.len());
    for row in rows {
        let pause = state.downloader.coordination.find_pause(&row.key).await;
        let backoff = state.downloader.coordination.find_backoff(&row.key).await;
        providers.push(json!({
            "id": row.id,
            "key": row.key,
            "enabled": row.is_enabled(),
            "pause": pause,
            "backoff": backoff,
        }));
    }

    (StatusCode::OK, Json(json!({"data": providers}))).into_response()
}

/// Body of a provider pause request
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PauseProviderRequest {
    /// Optional operator note shown in the UI
    #[serde(default)]
    pub note: Option<String>,
}

/// POST /providers/{id}/pause - Pause a provider
#[utoipa::path(
    post,
    path = "/providers/{id}/pause",
    tag = "providers",
    params(("id" = i64, Path, description = "Provider id")),
    request_body = PauseProviderRequest,
    responses(
        (status = 200, description = "Provider paused"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Provider not found")
    )
)]
pub async fn pause_provider(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    body: Option<Json<PauseProviderRequest>>,
) -> Response {
    if !identity.is_admin() {
        return forbidden("provider administration is admin-only");
    }

    let note = body.and_then(|Json(b)| b.note);
    match state
        .downloader
        .pause_provider(identity, id, note.as_deref())
        .await
    {
        Ok(entry) => (StatusCode::OK, Json(json!({"data": entry}))).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /providers/{id}/resume - Clear a provider pause
#[utoipa::path(
    post,
    path = "/providers/{id}/resume",
    tag = "providers",
    params(("id" = i64, Path, description = "Provider id")),
    responses(
        (status = 204, description = "Provider resumed"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Provider not found")
    )
)]
pub async fn resume_provider(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Response {
    if !identity.is_admin() {
        return forbidden("provider administration is admin-only");
    }

    match state.downloader.resume_provider(identity, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// Query parameters for status lookups
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// Provider key (single-provider endpoint)
    #[serde(default)]
    pub provider: Option<String>,
    /// Bypass the status cache
    #[serde(default)]
    pub refresh: Option<u8>,
}

/// GET /providers/status - Status of one provider
#[utoipa::path(
    get,
    path = "/providers/status",
    tag = "providers",
    responses(
        (status = 200, description = "Provider status"),
        (status = 403, description = "Admin only")
    )
)]
pub async fn provider_status(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<StatusQuery>,
) -> Response {
    if !identity.is_admin() {
        return forbidden("provider administration is admin-only");
    }

    let Some(provider) = query.provider else {
        return error_response(crate::error::Error::Validation(
            "provider query parameter is required".into(),
        ));
    };
    let refresh = query.refresh == Some(1);

    match state.downloader.provider_status(&provider, refresh).await {
        Ok(status) => (StatusCode::OK, Json(json!({"data": status}))).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /providers/status/all - Status of every loaded provider
#[utoipa::path(
    get,
    path = "/providers/status/all",
    tag = "providers",
    responses(
        (status = 200, description = "All provider statuses"),
        (status = 403, description = "Admin only")
    )
)]
pub async fn provider_status_all(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<StatusQuery>,
) -> Response {
    if !identity.is_admin() {
        return forbidden("provider administration is admin-only");
    }
    let refresh = query.refresh == Some(1);

    let mut statuses = serde_json::Map::new();
    for key in state.downloader.registry.keys().await {
        let entry = match state.downloader.provider_status(&key, refresh).await {
            Ok(status) => json!({"status": status}),
            Err(e) => json!({"error": e.to_string()}),
        };
        statuses.insert(key, entry);
    }

    (StatusCode::OK, Json(json!({"data": statuses}))).into_response()
}
