//! Provider search handler.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use crate::api::AppState;
use crate::api::error_response::error_response;

/// Query parameters for a search
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    /// Search query
    pub q: String,
    /// Comma-separated provider keys (all providers when absent)
    #[serde(default)]
    pub providers: Option<String>,
    /// Per-provider result limit
    #[serde(default)]
    pub limit: Option<usize>,
}

/// GET /search - Search across provider catalogs
#[utoipa::path(
    get,
    path = "/search",
    tag = "search",
    responses(
        (status = 200, description = "Search results with duplicate warnings and per-provider errors"),
        (status = 400, description = "Empty query")
    )
)]
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let provider_filter: Vec<String> = query
        .providers
        .as_deref()
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    match state
        .downloader
        .search(&query.q, &provider_filter, query.limit)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "data": outcome.hits,
                "duplicates": outcome.duplicates,
                "errors": outcome.errors,
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}
