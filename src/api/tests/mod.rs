//! Router tests: authentication, RBAC, and representative endpoints.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt; // for oneshot

use crate::api::create_router;
use crate::config::{AppConfig, Config, PathsConfig, ProviderSettings, StoreConfig};
use crate::orchestrator::MediaDownloader;
use crate::providers::{PlainVault, ProviderHandle};
use crate::test_support::{MockTransferClient, ScriptedResolver};

struct Fx {
    dl: Arc<MediaDownloader>,
    #[allow(dead_code)]
    downloads: TempDir,
    #[allow(dead_code)]
    library: TempDir,
}

async fn fixture() -> Fx {
    fixture_with(|_| {}).await
}

async fn fixture_with(tweak: impl FnOnce(&mut Config)) -> Fx {
    let downloads = TempDir::new().unwrap();
    let library = TempDir::new().unwrap();

    let mut config = Config {
        app: AppConfig {
            min_free_space_gb: 0.0,
            ..Default::default()
        },
        paths: PathsConfig {
            downloads: downloads.path().to_path_buf(),
            library: library.path().to_path_buf(),
        },
        store: StoreConfig {
            dsn: "sqlite::memory:".into(),
        },
        ..Default::default()
    };
    config.providers.insert(
        "webshare".into(),
        ProviderSettings {
            download_spacing_seconds: 0,
            ..Default::default()
        },
    );
    tweak(&mut config);

    let factory: crate::providers::ProviderFactory =
        Arc::new(|row, _| Ok(ProviderHandle::new(row.id, &row.key)));
    let dl = Arc::new(
        MediaDownloader::with_transfer_client(
            config,
            Arc::new(PlainVault),
            factory,
            MockTransferClient::new(),
        )
        .await
        .unwrap(),
    );

    dl.db.insert_user("alice", "user", Some("tok-alice")).await.unwrap();
    dl.db.insert_user("root", "admin", Some("tok-root")).await.unwrap();
    let provider_id = dl.db.insert_provider("webshare", true, None).await.unwrap();
    dl.registry
        .insert(
            ProviderHandle::new(provider_id, "webshare")
                .with_resolve(ScriptedResolver::always("https://dl.example")),
        )
        .await;

    Fx {
        dl,
        downloads,
        library,
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("X-Session-Token", token);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("X-Session-Token", token)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_needs_no_session() {
    let fx = fixture().await;
    let app = create_router(fx.dl.clone());

    let response = app.oneshot(get("/system/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn protected_routes_reject_missing_and_invalid_tokens() {
    let fx = fixture().await;

    let app = create_router(fx.dl.clone());
    let response = app.oneshot(get("/jobs", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let app = create_router(fx.dl.clone());
    let response = app.oneshot(get("/jobs", Some("wrong"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_cookie_works_like_the_header() {
    let fx = fixture().await;
    let app = create_router(fx.dl.clone());

    let request = Request::builder()
        .uri("/jobs")
        .header("cookie", "theme=dark; session=tok-alice")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn queue_insert_returns_ids_and_duplicates() {
    let fx = fixture().await;
    let app = create_router(fx.dl.clone());

    let response = app
        .oneshot(post_json(
            "/queue",
            "tok-alice",
            serde_json::json!({
                "items": [{"provider": "webshare", "external_id": "abc", "title": "The Matrix (1999)"}]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["inserted"].as_array().unwrap().len(), 1);
    assert!(body["data"]["duplicates"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn queue_insert_with_unknown_provider_is_a_400() {
    let fx = fixture().await;
    let app = create_router(fx.dl.clone());

    let response = app
        .oneshot(post_json(
            "/queue",
            "tok-alice",
            serde_json::json!({
                "items": [{"provider": "ghost", "external_id": "abc"}]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn jobs_listing_carries_the_paging_meta() {
    let fx = fixture().await;

    let app = create_router(fx.dl.clone());
    app.oneshot(post_json(
        "/queue",
        "tok-alice",
        serde_json::json!({
            "items": [
                {"provider": "webshare", "external_id": "a"},
                {"provider": "webshare", "external_id": "b"},
            ]
        }),
    ))
    .await
    .unwrap();

    let app = create_router(fx.dl.clone());
    let response = app
        .oneshot(get("/jobs?limit=1&offset=0", Some("tok-alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["meta"]["total"], 2);
    assert_eq!(body["meta"]["has_more"], true);
    assert!(body["meta"]["provider_backoff"].is_array());
}

#[tokio::test]
async fn provider_routes_are_admin_only() {
    let fx = fixture().await;

    let app = create_router(fx.dl.clone());
    let response = app.oneshot(get("/providers", Some("tok-alice"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let app = create_router(fx.dl.clone());
    let response = app.oneshot(get("/providers", Some("tok-root"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"][0]["key"], "webshare");
}

#[tokio::test]
async fn job_control_round_trips_through_the_api() {
    let fx = fixture().await;

    let app = create_router(fx.dl.clone());
    let response = app
        .oneshot(post_json(
            "/queue",
            "tok-alice",
            serde_json::json!({
                "items": [{"provider": "webshare", "external_id": "abc"}]
            }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    let id = body["data"]["inserted"][0].as_i64().unwrap();

    // Cancel through the API
    let app = create_router(fx.dl.clone());
    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/jobs/{id}/cancel"))
        .header("X-Session-Token", "tok-alice")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "canceled");

    // Delete reports deleted:true
    let app = create_router(fx.dl.clone());
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/jobs/{id}"))
        .header("X-Session-Token", "tok-alice")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"]["deleted"], true);
}

#[tokio::test]
async fn stats_endpoint_reports_counters() {
    let fx = fixture().await;
    let app = create_router(fx.dl.clone());

    let response = app.oneshot(get("/jobs/stats", Some("tok-alice"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["total"], 0);
    assert_eq!(body["data"]["queued"], 0);
}

#[tokio::test]
async fn insert_rate_limit_returns_429() {
    let fx = fixture_with(|c| {
        c.app.insert_rate_limit_per_minute = Some(60);
        c.app.insert_burst = 1;
    })
    .await;

    let payload = serde_json::json!({
        "items": [{"provider": "webshare", "external_id": "abc"}]
    });

    let app = create_router(fx.dl.clone());
    let first = app.clone();
    let response = first
        .oneshot(post_json("/queue", "tok-alice", payload.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(post_json("/queue", "tok-alice", payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "rate_limited");
}

#[tokio::test]
async fn storage_endpoint_reports_both_mounts() {
    let fx = fixture().await;
    let app = create_router(fx.dl.clone());

    let response = app
        .oneshot(get("/system/storage", Some("tok-alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert!(body["data"]["downloads"]["total_bytes"].as_u64().unwrap() > 0);
    assert!(body["data"]["library"].is_object());
}
