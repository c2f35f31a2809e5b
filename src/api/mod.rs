//! REST API server module
//!
//! Session-authenticated API over the orchestration core. Health and the
//! OpenAPI document are anonymous; everything else requires a session token
//! resolved through the users table, with admin-only routes enforced in
//! their handlers.

use axum::{
    Router, middleware,
    routing::{delete, get, patch, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::{Error, Result};
use crate::orchestrator::MediaDownloader;

pub mod auth;
pub mod error_response;
pub mod openapi;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Queue
/// - `POST /queue` - Enqueue download jobs
/// - `GET /jobs` - Paged job listing
/// - `GET /jobs/stats` - Aggregate counters
/// - `GET /jobs/stream` - Server-sent events stream
/// - `POST /jobs/reorder` - Rewrite queue positions
///
/// ## Job control
/// - `PATCH /jobs/:id/cancel|pause|resume` - Lifecycle control
/// - `PATCH /jobs/:id/priority` - Priority change
/// - `DELETE /jobs/:id` - Delete (file removal for completed jobs)
///
/// ## Providers (admin)
/// - `GET /providers` - List with coordination state
/// - `POST /providers/:id/pause|resume` - Pause control
/// - `GET /providers/status[/all]` - Cached account statuses
///
/// ## Catalog
/// - `GET /search` - Fan-out search with duplicate warnings
/// - `GET /catalog/menu` - Cached menu browsing
/// - `GET /catalog/variants` - Cached variant listing
/// - `POST /catalog/bulk` - Asynchronous batch expansion
///
/// ## System
/// - `GET /system/storage` - Mount usage
/// - `GET /system/health` - Health check (anonymous)
/// - `GET /notifications` - The caller's recent notifications
/// - `GET /openapi.json` - OpenAPI specification (anonymous)
pub fn create_router(downloader: Arc<MediaDownloader>) -> Router {
    let config = downloader.get_config();
    let state = AppState::new(downloader);

    let protected = Router::new()
        // Queue
        .route("/queue", post(routes::enqueue))
        .route("/jobs", get(routes::list_jobs))
        .route("/jobs/stats", get(routes::job_stats))
        .route("/jobs/stream", get(routes::job_stream))
        .route("/jobs/reorder", post(routes::reorder_jobs))
        // Job control
        .route("/jobs/:id", delete(routes::delete_job))
        .route("/jobs/:id/cancel", patch(routes::cancel_job))
        .route("/jobs/:id/pause", patch(routes::pause_job))
        .route("/jobs/:id/resume", patch(routes::resume_job))
        .route("/jobs/:id/priority", patch(routes::set_job_priority))
        // Providers
        .route("/providers", get(routes::list_providers))
        .route("/providers/status", get(routes::provider_status))
        .route("/providers/status/all", get(routes::provider_status_all))
        .route("/providers/:id/pause", post(routes::pause_provider))
        .route("/providers/:id/resume", post(routes::resume_provider))
        // Catalog
        .route("/search", get(routes::search))
        .route("/catalog/menu", get(routes::catalog_menu))
        .route("/catalog/variants", get(routes::catalog_variants))
        .route("/catalog/bulk", post(routes::bulk_enqueue))
        // System
        .route("/system/storage", get(routes::system_storage))
        .route("/notifications", get(routes::list_notifications))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    let router = Router::new()
        .route("/system/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec))
        .merge(protected);

    let router = if config.server.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = if config.server.cors_origins.is_empty() {
        router
    } else {
        // Origins are operator-configured; allow the listed ones broadly
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Bind and serve the API until shutdown
pub async fn start_api_server(downloader: Arc<MediaDownloader>) -> Result<()> {
    let config = downloader.get_config();
    let bind = config.server.bind;
    let shutdown = downloader.shutdown_token();

    let router = create_router(downloader);

    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| Error::ApiServerError(format!("failed to bind {bind}: {e}")))?;

    tracing::info!(address = %bind, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::ApiServerError(e.to_string()))?;

    Ok(())
}
