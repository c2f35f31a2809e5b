//! The `MediaDownloader` facade: construction, background services, queue
//! submission, search, and bulk intake.
//!
//! The facade owns every long-lived component (store, registry,
//! coordination, event bus, transfer client) and exposes the operations the
//! REST API calls. Job control operations live in [`control`].

mod control;

use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::bulk::{BulkResolver, MAX_BULK_ITEMS};
use crate::catalog::CatalogCache;
use crate::config::Config;
use crate::coordination::Coordination;
use crate::db::{Database, NewJob};
use crate::downloader::{RpcTransferClient, TransferClient};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::media_server::MediaServerClient;
use crate::providers::{KeyVault, ProviderFactory, Registry, SearchItem};
use crate::retry::{busy_to_unavailable, with_retry};
use crate::scheduler::Scheduler;
use crate::types::{BulkItem, Category, Event, Identity, JobId, QueueItem};
use crate::worker::Worker;

/// One search hit, tagged with the provider that produced it
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct SearchHit {
    /// Provider key
    pub provider: String,
    /// The provider's item
    #[serde(flatten)]
    pub item: SearchItem,
}

/// One provider's failure during a fan-out search
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct SearchError {
    /// Provider key
    pub provider: String,
    /// What went wrong
    pub message: String,
}

/// Aggregate result of a fan-out search
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    /// Hits across all queried providers
    pub hits: Vec<SearchHit>,
    /// Titles of completed library entries resembling the query
    pub duplicates: Vec<String>,
    /// Providers that failed, with their errors
    pub errors: Vec<SearchError>,
}

/// The download orchestration core (one instance per node)
pub struct MediaDownloader {
    /// Store handle, public for embedders and integration tests
    pub db: Arc<Database>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) coordination: Arc<Coordination>,
    pub(crate) transfer: Arc<dyn TransferClient>,
    pub(crate) events: EventBus,
    pub(crate) config: Arc<Config>,
    pub(crate) catalog: Arc<CatalogCache>,
    pub(crate) media: Arc<MediaServerClient>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) queue_wake: Arc<Notify>,
}

impl MediaDownloader {
    /// Build the orchestrator against the real transfer daemon.
    ///
    /// Startup failures map to the CLI exit codes: invalid configuration
    /// (1), unreachable store (2), and a daemon that stays unreachable
    /// through the startup grace (3).
    pub async fn new(
        config: Config,
        vault: Arc<dyn KeyVault>,
        factory: ProviderFactory,
    ) -> Result<Self> {
        config.validate()?;
        let transfer: Arc<dyn TransferClient> = Arc::new(RpcTransferClient::new(
            &config.downloader,
            config.retry.clone(),
        ));

        let downloader = Self::build(config, vault, factory, transfer).await?;
        downloader.probe_daemon().await?;
        Ok(downloader)
    }

    /// Build with an injected transfer client (tests, embedded daemons)
    pub async fn with_transfer_client(
        config: Config,
        vault: Arc<dyn KeyVault>,
        factory: ProviderFactory,
        transfer: Arc<dyn TransferClient>,
    ) -> Result<Self> {
        config.validate()?;
        Self::build(config, vault, factory, transfer).await
    }

    async fn build(
        config: Config,
        vault: Arc<dyn KeyVault>,
        factory: ProviderFactory,
        transfer: Arc<dyn TransferClient>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.paths.downloads)
            .await
            .map_err(|e| Error::Config {
                message: format!(
                    "cannot create downloads directory '{}': {e}",
                    config.paths.downloads.display()
                ),
                key: Some("paths.downloads".into()),
            })?;
        tokio::fs::create_dir_all(&config.paths.library)
            .await
            .map_err(|e| Error::Config {
                message: format!(
                    "cannot create library directory '{}': {e}",
                    config.paths.library.display()
                ),
                key: Some("paths.library".into()),
            })?;

        let db = Arc::new(Database::new(&config.store.dsn).await?);
        let config = Arc::new(config);

        // Crash recovery: claims from a previous process are nobody's now
        let requeued = db.requeue_stuck_starting().await?;
        if requeued > 0 {
            tracing::warn!(count = requeued, "requeued jobs stuck in starting from a previous run");
        }
        let reset = db.requeue_stuck_bulk_tasks().await?;
        if reset > 0 {
            tracing::warn!(
                count = reset,
                "reset bulk tasks stuck in processing from a previous run"
            );
        }

        let registry = Arc::new(Registry::load(&db, vault.as_ref(), &factory).await?);
        let coordination = Arc::new(Coordination::load(db.clone(), config.clone()).await?);
        let catalog = Arc::new(CatalogCache::new(
            db.clone(),
            registry.clone(),
            config.clone(),
        ));
        let media = Arc::new(MediaServerClient::new(config.media_server.clone()));

        Ok(Self {
            db,
            registry,
            coordination,
            transfer,
            events: EventBus::new(),
            config,
            catalog,
            media,
            shutdown: CancellationToken::new(),
            queue_wake: Arc::new(Notify::new()),
        })
    }

    /// Verify the daemon answers within the startup grace
    async fn probe_daemon(&self) -> Result<()> {
        let probes = self.config.downloader.startup_probes.max(1);
        let mut last_error = None;

        for attempt in 1..=probes {
            match self.transfer.version().await {
                Ok(version) => {
                    tracing::info!(version = %version, "transfer daemon reachable");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, probes, error = %e, "daemon probe failed");
                    last_error = Some(e);
                    if attempt < probes {
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        }

        Err(Error::Downloader(last_error.unwrap_or(
            crate::error::DownloaderError::Transport("no probe attempted".into()),
        )))
    }

    /// Spawn the scheduler, worker, and bulk resolver loops
    pub fn start(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let scheduler = Arc::new(Scheduler::new(
            self.db.clone(),
            self.registry.clone(),
            self.coordination.clone(),
            self.transfer.clone(),
            self.events.clone(),
            self.config.clone(),
            self.shutdown.clone(),
            self.queue_wake.clone(),
        ));
        let worker = Arc::new(Worker::new(
            self.db.clone(),
            self.transfer.clone(),
            self.coordination.clone(),
            self.events.clone(),
            self.config.clone(),
            self.media.clone(),
            self.shutdown.clone(),
        ));
        let bulk = Arc::new(BulkResolver::new(
            self.db.clone(),
            self.registry.clone(),
            self.coordination.clone(),
            self.config.clone(),
            self.shutdown.clone(),
            self.queue_wake.clone(),
        ));

        vec![scheduler.spawn(), worker.spawn(), bulk.spawn()]
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// The active configuration
    pub fn get_config(&self) -> Arc<Config> {
        self.config.clone()
    }

    /// The catalog cache
    pub fn catalog(&self) -> &CatalogCache {
        &self.catalog
    }

    /// Begin a graceful shutdown: components observe the signal, finish
    /// their in-flight step, and stop; subscribers get a final event.
    pub fn begin_shutdown(&self) {
        tracing::info!("shutdown initiated");
        self.shutdown.cancel();
        self.events.publish(Event::Shutdown);
    }

    /// Insert a batch of queue items for a user.
    ///
    /// Returns the new job ids plus the titles of completed library entries
    /// that look like duplicates of the submission.
    pub async fn enqueue(
        &self,
        identity: Identity,
        items: Vec<QueueItem>,
        category_override: Option<Category>,
    ) -> Result<(Vec<JobId>, Vec<String>)> {
        if items.is_empty() {
            return Err(Error::Validation("items must not be empty".into()));
        }

        let mut batch = Vec::with_capacity(items.len());
        let mut duplicates = Vec::new();

        for item in &items {
            let provider = self
                .db
                .find_provider_by_key(&item.provider)
                .await?
                .filter(|p| p.is_enabled())
                .ok_or_else(|| {
                    Error::Validation(format!("unknown provider key: {}", item.provider))
                })?;

            let title = item
                .title
                .clone()
                .unwrap_or_else(|| item.external_id.clone());

            for existing in self.db.find_existing_by_title_tokens(&title).await? {
                if !duplicates.contains(&existing) {
                    duplicates.push(existing);
                }
            }

            batch.push(NewJob {
                user_id: identity.user_id,
                provider_id: provider.id,
                provider_key: item.provider.clone(),
                external_id: item.external_id.clone(),
                title,
                category: category_override.unwrap_or_default(),
                metadata: item.metadata.clone(),
                priority: item.priority.unwrap_or(100),
            });
        }

        let ids = with_retry(&self.config.retry, || self.db.insert_jobs(&batch))
            .await
            .map_err(busy_to_unavailable)?;

        let payload = serde_json::json!({
            "count": ids.len(),
            "ids": ids.iter().map(|id| id.get()).collect::<Vec<_>>(),
        });
        self.audit(identity, "queue.insert", "job", None, Some(&payload))
            .await;

        // New rows mean new work; don't wait out the scheduler's tick
        self.queue_wake.notify_one();

        for id in &ids {
            if let Ok(Some(row)) = self.db.get_job(*id).await {
                self.events.publish(Event::JobUpdated { job: row.to_info() });
            }
        }

        Ok((ids, duplicates))
    }

    /// Fan a search out over providers, collecting per-provider failures
    /// and duplicate-library warnings.
    pub async fn search(
        &self,
        query: &str,
        provider_filter: &[String],
        limit: Option<usize>,
    ) -> Result<SearchOutcome> {
        if query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".into()));
        }
        let limit = limit.unwrap_or(self.config.app.default_search_limit);

        let mut hits = Vec::new();
        let mut errors = Vec::new();

        for handle in self.registry.all().await {
            if !provider_filter.is_empty() && !provider_filter.contains(&handle.key) {
                continue;
            }
            let Some(searchable) = handle.searchable() else {
                continue;
            };

            match searchable.search(query, limit).await {
                Ok(items) => {
                    hits.extend(items.into_iter().map(|item| SearchHit {
                        provider: handle.key.clone(),
                        item,
                    }));
                }
                Err(e) => {
                    tracing::warn!(provider = %handle.key, error = %e, "search failed");
                    errors.push(SearchError {
                        provider: handle.key.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let duplicates = self.db.find_existing_by_title_tokens(query).await?;

        Ok(SearchOutcome {
            hits,
            duplicates,
            errors,
        })
    }

    /// Accept a bulk submission for asynchronous expansion
    pub async fn enqueue_bulk(
        &self,
        identity: Identity,
        items: Vec<BulkItem>,
        options: Option<serde_json::Value>,
    ) -> Result<i64> {
        if items.is_empty() {
            return Err(Error::Validation("items must not be empty".into()));
        }
        if items.len() > MAX_BULK_ITEMS {
            return Err(Error::Validation(format!(
                "bulk submissions are capped at {MAX_BULK_ITEMS} items; split the batch"
            )));
        }

        let payload = serde_json::to_string(&items)?;
        let options_json = options.map(|o| o.to_string());
        let task_id = self
            .db
            .insert_bulk_task(
                identity.user_id,
                &payload,
                options_json.as_deref(),
                items.len() as u32,
            )
            .await?;

        let audit_payload = serde_json::json!({"items": items.len()});
        self.audit(
            identity,
            "bulk.enqueued",
            "bulk_task",
            Some(&task_id.to_string()),
            Some(&audit_payload),
        )
        .await;

        Ok(task_id)
    }

    /// Write an audit record for a user-initiated action
    pub(crate) async fn audit(
        &self,
        identity: Identity,
        action: &str,
        subject_type: &str,
        subject_id: Option<&str>,
        payload: Option<&serde_json::Value>,
    ) {
        let actor = format!("user:{}", identity.user_id);
        if let Err(e) = self
            .db
            .insert_audit(&actor, action, subject_type, subject_id, payload)
            .await
        {
            tracing::error!(error = %e, action, "failed to write audit record");
        }
    }
}


impl MediaDownloader {
    /// Shared shutdown signal for embedding servers
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn the REST API server in a background task
    pub fn spawn_api_server(
        self: &Arc<Self>,
    ) -> tokio::task::JoinHandle<Result<()>> {
        let downloader = self.clone();
        tokio::spawn(async move { crate::api::start_api_server(downloader).await })
    }
}
