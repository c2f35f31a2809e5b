//! Catalog browsing and bulk intake handlers.

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::api::AppState;
use crate::api::error_response::{error_response, too_many_requests};
use crate::types::{BulkItem, Identity};

/// Query parameters for a menu lookup
#[derive(Debug, Deserialize)]
pub struct MenuQuery {
    /// Provider key
    pub provider: String,
    /// Browse path ("/" when absent)
    #[serde(default)]
    pub path: Option<String>,
    /// Force a refetch
    #[serde(default)]
    pub refresh: Option<u8>,
}

/// GET /catalog/menu - Browse a provider menu page (cached)
#[utoipa::path(
    get,
    path = "/catalog/menu",
    tag = "catalog",
    responses(
        (status = 200, description = "Menu page with cache provenance"),
        (status = 404, description = "Unknown provider")
    )
)]
pub async fn catalog_menu(
    State(state): State<AppState>,
    Query(query): Query<MenuQuery>,
) -> Response {
    let path = query.path.as_deref().unwrap_or("/");
    let refresh = query.refresh == Some(1);

    match state
        .downloader
        .catalog()
        .menu(&query.provider, path, refresh)
        .await
    {
        Ok(lookup) => (
            StatusCode::OK,
            Json(json!({
                "data": {
                    "path": crate::catalog::normalize_path(path),
                    "title": lookup.data.title,
                    "items": lookup.data.items,
                },
                "cache": lookup.cache,
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Query parameters for a variants lookup
#[derive(Debug, Deserialize)]
pub struct VariantsQuery {
    /// Provider key
    pub provider: String,
    /// Item key
    pub external_id: String,
    /// Force a refetch
    #[serde(default)]
    pub refresh: Option<u8>,
}

/// GET /catalog/variants - Stream variants of an item (cached)
#[utoipa::path(
    get,
    path = "/catalog/variants",
    tag = "catalog",
    responses(
        (status = 200, description = "Variant list with cache provenance"),
        (status = 404, description = "Unknown provider")
    )
)]
pub async fn catalog_variants(
    State(state): State<AppState>,
    Query(query): Query<VariantsQuery>,
) -> Response {
    let refresh = query.refresh == Some(1);

    match state
        .downloader
        .catalog()
        .variants(&query.provider, &query.external_id, refresh)
        .await
    {
        Ok(lookup) => (
            StatusCode::OK,
            Json(json!({
                "data": lookup.data,
                "cache": lookup.cache,
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Body of a bulk submission
#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkRequest {
    /// Items to expand asynchronously into jobs
    pub items: Vec<BulkItem>,
    /// Options forwarded to the resolver (category, priority)
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

/// POST /catalog/bulk - Submit a batch for asynchronous expansion
#[utoipa::path(
    post,
    path = "/catalog/bulk",
    tag = "catalog",
    request_body = BulkRequest,
    responses(
        (status = 202, description = "Bulk task accepted"),
        (status = 400, description = "Validation error"),
        (status = 429, description = "Insert rate limit exceeded")
    )
)]
pub async fn bulk_enqueue(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<BulkRequest>,
) -> Response {
    if let Some(wait) = state.insert_limiter.check(identity.user_id).await {
        return too_many_requests(wait);
    }

    match state
        .downloader
        .enqueue_bulk(identity, body.items, body.options)
        .await
    {
        Ok(task_id) => (
            StatusCode::ACCEPTED,
            Json(json!({"taskId": task_id})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}
