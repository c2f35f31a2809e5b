//! Queue handlers: submission, listing, stats, reorder, and the SSE stream.

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use utoipa::ToSchema;

use crate::api::AppState;
use crate::api::error_response::{error_response, too_many_requests};
use crate::events::RESYNC_EVENT;
use crate::types::{Category, Identity, JobId, QueueItem};

/// Body of a queue submission
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnqueueRequest {
    /// Items to enqueue
    pub items: Vec<QueueItem>,
    /// Submission-wide options
    #[serde(default)]
    pub options: Option<EnqueueOptions>,
}

/// Options applying to every item of a submission
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct EnqueueOptions {
    /// Category override for the created jobs
    #[serde(default)]
    pub category: Option<Category>,
}

/// POST /queue - Enqueue download jobs
#[utoipa::path(
    post,
    path = "/queue",
    tag = "queue",
    request_body = EnqueueRequest,
    responses(
        (status = 200, description = "Jobs inserted"),
        (status = 400, description = "Validation error"),
        (status = 429, description = "Insert rate limit exceeded")
    )
)]
pub async fn enqueue(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<EnqueueRequest>,
) -> Response {
    if let Some(wait) = state.insert_limiter.check(identity.user_id).await {
        return too_many_requests(wait);
    }

    let category = body.options.and_then(|o| o.category);
    match state.downloader.enqueue(identity, body.items, category).await {
        Ok((ids, duplicates)) => (
            StatusCode::OK,
            Json(json!({
                "data": {
                    "inserted": ids,
                    "duplicates": duplicates,
                }
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Query parameters for the job listing
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Restrict to the caller's jobs (admins see everything by default)
    #[serde(default)]
    pub mine: Option<u8>,
    /// Page size (default 50, capped at 200)
    #[serde(default)]
    pub limit: Option<i64>,
    /// Page offset
    #[serde(default)]
    pub offset: Option<i64>,
}

/// GET /jobs - Paged job listing
#[utoipa::path(
    get,
    path = "/jobs",
    tag = "queue",
    responses(
        (status = 200, description = "Job page with meta"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<ListJobsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let mine_only = query.mine == Some(1);
    let user_filter = if identity.is_admin() && !mine_only {
        None
    } else {
        Some(identity.user_id)
    };

    let (rows, total) = match state.downloader.db.list_paged(user_filter, limit, offset).await {
        Ok(page) => page,
        Err(e) => return error_response(e),
    };

    let backoff: Vec<serde_json::Value> = state
        .downloader
        .coordination
        .active()
        .await
        .into_iter()
        .filter_map(|entry| {
            entry.backoff.map(|b| {
                json!({
                    "provider": entry.provider,
                    "reason": b.reason,
                    "expires_at": b.expires_at,
                })
            })
        })
        .collect();

    let jobs: Vec<_> = rows.iter().map(|row| row.to_info()).collect();
    (
        StatusCode::OK,
        Json(json!({
            "data": jobs,
            "meta": {
                "total": total,
                "limit": limit,
                "offset": offset,
                "has_more": offset + (jobs.len() as i64) < total,
                "provider_backoff": backoff,
            }
        })),
    )
        .into_response()
}

/// GET /jobs/stats - Aggregate queue counters
#[utoipa::path(
    get,
    path = "/jobs/stats",
    tag = "queue",
    responses(
        (status = 200, description = "Queue statistics", body = crate::types::QueueStats),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn job_stats(State(state): State<AppState>) -> Response {
    match state.downloader.db.stats().await {
        Ok(stats) => (StatusCode::OK, Json(json!({"data": stats}))).into_response(),
        Err(e) => error_response(e),
    }
}

/// Body of a reorder request
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReorderRequest {
    /// Job ids in the desired order
    pub order: Vec<JobId>,
}

/// POST /jobs/reorder - Rewrite queue positions
#[utoipa::path(
    post,
    path = "/jobs/reorder",
    tag = "queue",
    request_body = ReorderRequest,
    responses(
        (status = 200, description = "Positions rewritten"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn reorder_jobs(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<ReorderRequest>,
) -> Response {
    match state.downloader.reorder_jobs(identity, &body.order).await {
        Ok(applied) => (
            StatusCode::OK,
            Json(json!({"data": {"applied": applied}})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /jobs/stream - Server-sent events stream of job lifecycle events
#[utoipa::path(
    get,
    path = "/jobs/stream",
    tag = "queue",
    responses(
        (status = 200, description = "Event stream (text/event-stream)", content_type = "text/event-stream")
    )
)]
pub async fn job_stream(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let receiver = state.downloader.subscribe();
    let stream = BroadcastStream::new(receiver);

    let sse_stream = stream.filter_map(move |result| match result {
        Ok(event) if event.visible_to(&identity) => match serde_json::to_string(&event) {
            Ok(json_data) => Some(Ok(SseEvent::default()
                .event(event.sse_name())
                .data(json_data))),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event");
                None
            }
        },
        // Events for other users are silently skipped
        Ok(_) => None,
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
            // The subscriber fell behind the ring buffer; tell it to refetch
            tracing::warn!(skipped, "SSE subscriber lagged");
            Some(Ok(SseEvent::default()
                .event(RESYNC_EVENT)
                .data(format!(r#"{{"skipped":{skipped}}}"#))))
        }
    });

    Sse::new(sse_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
