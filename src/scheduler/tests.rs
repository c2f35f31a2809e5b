//! Scheduler tests with an in-process daemon and scripted providers.

use super::*;
use crate::config::{AppConfig, ProviderSettings};
use crate::db::tests::{new_job, seed_provider, seed_user, test_db};
use crate::providers::ProviderHandle;
use crate::test_support::{MockTransferClient, ScriptedResolver};
use crate::types::JobId;

struct Fixture {
    scheduler: Scheduler,
    db: Arc<Database>,
    transfer: Arc<MockTransferClient>,
    coordination: Arc<Coordination>,
    resolver: Arc<ScriptedResolver>,
    events: EventBus,
    user: i64,
    provider: i64,
}

async fn fixture() -> Fixture {
    fixture_with(|_| {}).await
}

async fn fixture_with(tweak: impl FnOnce(&mut Config)) -> Fixture {
    let mut config = Config {
        app: AppConfig {
            max_active_downloads: 3,
            min_free_space_gb: 0.0,
            ..Default::default()
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
    let config = Arc::new(config);

    let db = Arc::new(test_db().await);
    let user = seed_user(&db, "alice", "user").await;
    let provider = seed_provider(&db, "webshare").await;

    let resolver = ScriptedResolver::always("https://dl.example");
    let registry = Arc::new(Registry::with_handles(vec![
        ProviderHandle::new(provider, "webshare").with_resolve(resolver.clone()),
    ]));
    let coordination = Arc::new(
        Coordination::load(db.clone(), config.clone()).await.unwrap(),
    );
    let transfer = MockTransferClient::new();
    let events = EventBus::new();

    let scheduler = Scheduler::new(
        db.clone(),
        registry,
        coordination.clone(),
        transfer.clone(),
        events.clone(),
        config,
        CancellationToken::new(),
        Arc::new(Notify::new()),
    );

    Fixture {
        scheduler,
        db,
        transfer,
        coordination,
        resolver,
        events,
        user,
        provider,
    }
}

async fn enqueue_one(fx: &Fixture, external_id: &str) -> JobId {
    fx.db
        .insert_jobs(&[new_job(fx.user, fx.provider, "webshare", external_id)])
        .await
        .unwrap()[0]
}

#[tokio::test]
async fn happy_path_binds_the_job_to_the_daemon() {
    let fx = fixture().await;
    let id = enqueue_one(&fx, "abc").await;
    let mut rx = fx.events.subscribe();

    fx.scheduler.tick().await.unwrap();

    let row = fx.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(row.status(), JobStatus::Downloading);
    assert!(row.downloader_handle.is_some());
    assert_eq!(
        row.source_url.as_deref(),
        Some("https://dl.example/abc"),
        "the resolved URL is recorded on the row"
    );

    let added = fx.transfer.added().await;
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].urls, vec!["https://dl.example/abc"]);

    match rx.try_recv().unwrap() {
        Event::JobUpdated { job } => assert_eq!(job.status, JobStatus::Downloading),
        other => panic!("expected job.updated, got {other:?}"),
    }
}

#[tokio::test]
async fn admission_respects_the_concurrency_cap() {
    let fx = fixture_with(|c| c.app.max_active_downloads = 2).await;
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(enqueue_one(&fx, &format!("item-{i}")).await);
    }

    fx.scheduler.tick().await.unwrap();

    let active = fx.db.count_admitted().await.unwrap();
    assert_eq!(active, 2, "exactly max_active_downloads jobs are admitted");

    // A second tick with the slots still occupied admits nothing more
    fx.scheduler.tick().await.unwrap();
    assert_eq!(fx.db.count_admitted().await.unwrap(), 2);

    for id in &ids[2..] {
        let row = fx.db.get_job(*id).await.unwrap().unwrap();
        assert_eq!(row.status(), JobStatus::Queued);
    }
}

#[tokio::test]
async fn rate_limit_requeues_and_installs_backoff() {
    let fx = fixture().await;
    let id = enqueue_one(&fx, "abc").await;
    fx.resolver
        .push_outcome(Err(ProviderError::RateLimited {
            retry_after_seconds: Some(60),
        }))
        .await;

    fx.scheduler.tick().await.unwrap();

    let row = fx.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(row.status(), JobStatus::Queued, "transient errors requeue");
    assert_eq!(row.error_text.as_deref(), Some("rate limited, retrying"));

    let backoff = fx.coordination.find_backoff("webshare").await.unwrap();
    assert_eq!(backoff.window_secs, 60);

    // While the backoff holds, the job is not claimed and the provider
    // is not called again
    fx.scheduler.tick().await.unwrap();
    assert_eq!(
        fx.resolver.calls.load(std::sync::atomic::Ordering::SeqCst),
        1,
        "no resolution happens inside the backoff window"
    );
    assert!(fx.transfer.added().await.is_empty());
}

#[tokio::test]
async fn permanent_resolution_failure_ends_the_job() {
    let fx = fixture().await;
    let id = enqueue_one(&fx, "abc").await;
    fx.resolver
        .push_outcome(Err(ProviderError::ItemNotFound("abc".into())))
        .await;
    let mut rx = fx.events.subscribe();

    fx.scheduler.tick().await.unwrap();

    let row = fx.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(row.status(), JobStatus::Failed);
    assert!(row.error_text.as_deref().unwrap().contains("not found"));

    match rx.try_recv().unwrap() {
        Event::JobFailed { job } => assert_eq!(job.id, id),
        other => panic!("expected job.failed, got {other:?}"),
    }

    let audit = fx.db.recent_audit(10).await.unwrap();
    assert!(audit.iter().any(|a| a.action == "job.failed"));
    let notifications = fx.db.recent_notifications(fx.user, 10).await.unwrap();
    assert!(notifications.iter().any(|n| n.kind == "job.failed"));
}

#[tokio::test]
async fn paused_provider_is_never_claimed() {
    let fx = fixture().await;
    let id = enqueue_one(&fx, "abc").await;
    fx.coordination.pause("webshare", "admin", None).await.unwrap();

    fx.scheduler.tick().await.unwrap();

    let row = fx.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(row.status(), JobStatus::Queued);
    assert_eq!(
        fx.resolver.calls.load(std::sync::atomic::Ordering::SeqCst),
        0,
        "a paused provider's items are not even resolved"
    );

    // Clearing the pause makes the job schedulable again
    fx.coordination.resume("webshare").await.unwrap();
    fx.scheduler.tick().await.unwrap();
    let row = fx.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(row.status(), JobStatus::Downloading);
}

#[tokio::test]
async fn daemon_transport_failure_holds_admission_briefly() {
    let fx = fixture().await;
    let id = enqueue_one(&fx, "abc").await;
    fx.transfer
        .fail_add_with(crate::error::DownloaderError::Transport("refused".into()))
        .await;

    fx.scheduler.tick().await.unwrap();

    let row = fx.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(
        row.status(),
        JobStatus::Queued,
        "a dead daemon is not the job's fault"
    );

    // Even with the daemon healed, the hold suppresses the next tick
    fx.transfer.heal().await;
    fx.scheduler.tick().await.unwrap();
    assert!(
        fx.transfer.added().await.is_empty(),
        "the scheduler holds off instead of hammering the daemon"
    );
}

#[tokio::test]
async fn daemon_rejection_fails_the_job() {
    let fx = fixture().await;
    let id = enqueue_one(&fx, "abc").await;
    fx.transfer
        .fail_add_with(crate::error::DownloaderError::Rpc {
            code: 1,
            message: "unsupported scheme".into(),
        })
        .await;

    fx.scheduler.tick().await.unwrap();

    let row = fx.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(row.status(), JobStatus::Failed);
    assert!(row.error_text.as_deref().unwrap().contains("rejected"));
}

#[tokio::test]
async fn global_speed_cap_rides_along_as_a_daemon_option() {
    let fx = fixture_with(|c| c.downloader.max_speed_mb_s = 2.0).await;
    enqueue_one(&fx, "abc").await;

    fx.scheduler.tick().await.unwrap();

    let added = fx.transfer.added().await;
    assert_eq!(added[0].options.max_download_limit, Some(2_000_000));
}

#[tokio::test]
async fn per_job_rate_limit_overrides_the_global_cap() {
    let fx = fixture_with(|c| c.downloader.max_speed_mb_s = 2.0).await;
    let mut job = new_job(fx.user, fx.provider, "webshare", "abc");
    job.metadata = Some(serde_json::json!({"rate_limit_bps": 500_000}));
    fx.db.insert_jobs(&[job]).await.unwrap();

    fx.scheduler.tick().await.unwrap();

    let added = fx.transfer.added().await;
    assert_eq!(added[0].options.max_download_limit, Some(500_000));
}

#[tokio::test]
async fn multi_url_resolution_uses_the_first_and_stores_alternates() {
    let fx = fixture().await;
    let id = enqueue_one(&fx, "abc").await;

    // Scripted single outcome cannot carry alternates, so resolve by hand:
    // swap in a resolver that returns two URLs
    let multi = crate::providers::ResolvedSource::new(vec![
        url::Url::parse("https://a.example/1").unwrap(),
        url::Url::parse("https://b.example/2").unwrap(),
    ])
    .unwrap();
    let claimed = fx.db.claim_next_runnable(1, &[]).await.unwrap();
    fx.scheduler.bind(claimed.into_iter().next().unwrap(), multi).await;

    let row = fx.db.get_job(id).await.unwrap().unwrap();
    assert_eq!(row.status(), JobStatus::Downloading);
    assert_eq!(row.source_url.as_deref(), Some("https://a.example/1"));

    let meta: serde_json::Value =
        serde_json::from_str(row.metadata.as_deref().unwrap()).unwrap();
    assert_eq!(
        meta["source_url_alternates"],
        serde_json::json!(["https://b.example/2"]),
        "alternates are kept for future use, not passed to the daemon"
    );

    let added = fx.transfer.added().await;
    assert_eq!(added[0].urls.len(), 1, "single-URL per job");
}
