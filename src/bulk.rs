//! Bulk resolver: expands batch submissions into individual jobs.
//!
//! A single loop claims one pending bulk task at a time and walks its items
//! sequentially with the same per-provider spacing and backoff discipline as
//! the scheduler. Resolved items are inserted through the store in chunks;
//! items that cannot be resolved are counted, never retried. The outputs
//! are ordinary queued jobs subject to the usual admission rules.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordination::Coordination;
use crate::db::{BulkTaskRow, Database, NewJob};
use crate::providers::Registry;
use crate::types::{BulkItem, Category};

/// Interval between claim attempts when the task queue is empty
const TICK_INTERVAL: Duration = Duration::from_secs(2);

/// Jobs inserted per store round-trip
const INSERT_CHUNK: usize = 25;

/// Hard cap on items per bulk task; larger batches are split client-side
pub const MAX_BULK_ITEMS: usize = 1000;

/// Options accepted alongside a bulk submission
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BulkOptions {
    /// Category override for every created job
    #[serde(default)]
    pub category: Option<Category>,

    /// Priority for every created job (default 100)
    #[serde(default)]
    pub priority: Option<i32>,
}

/// The bulk resolution loop
pub struct BulkResolver {
    db: Arc<Database>,
    registry: Arc<Registry>,
    coordination: Arc<Coordination>,
    config: Arc<Config>,
    shutdown: CancellationToken,
    queue_wake: Arc<Notify>,
}

impl BulkResolver {
    /// Wire up a resolver; `queue_wake` pokes the scheduler after inserts
    pub fn new(
        db: Arc<Database>,
        registry: Arc<Registry>,
        coordination: Arc<Coordination>,
        config: Arc<Config>,
        shutdown: CancellationToken,
        queue_wake: Arc<Notify>,
    ) -> Self {
        Self {
            db,
            registry,
            coordination,
            config,
            shutdown,
            queue_wake,
        }
    }

    /// Spawn the resolver loop
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("bulk resolver started");
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        tracing::info!("bulk resolver stopping");
                        break;
                    }
                    _ = tokio::time::sleep(TICK_INTERVAL) => {}
                }

                if self.shutdown.is_cancelled() {
                    break;
                }

                match self.process_next().await {
                    Ok(true) => {} // immediately look for the next task
                    Ok(false) => {}
                    Err(e) => tracing::error!(error = %e, "bulk task processing failed"),
                }
            }
        })
    }

    /// Claim and process one pending task; false when the queue was empty
    pub(crate) async fn process_next(&self) -> crate::error::Result<bool> {
        let Some(task) = self.db.claim_pending_bulk_task().await? else {
            return Ok(false);
        };

        tracing::info!(task_id = task.id, items = task.total_items, "bulk task claimed");
        self.process(task).await;
        Ok(true)
    }

    async fn process(&self, task: BulkTaskRow) {
        let items: Vec<BulkItem> = match serde_json::from_str(&task.payload) {
            Ok(items) => items,
            Err(e) => {
                self.finish_failed(&task, 0, 0, &format!("invalid payload: {e}"))
                    .await;
                return;
            }
        };
        let options: BulkOptions = task
            .options
            .as_deref()
            .and_then(|o| serde_json::from_str(o).ok())
            .unwrap_or_default();

        // A task reset after an interrupted run carries its counters;
        // resume past the items already accounted for
        let mut processed: u32 = task.processed_items.max(0) as u32;
        let mut failed: u32 = task.failed_items.max(0) as u32;
        let skip = (processed + failed) as usize;
        let mut buffer: Vec<NewJob> = Vec::with_capacity(INSERT_CHUNK);
        let mut spacing_gates: HashMap<String, Instant> = HashMap::new();
        let mut interrupted = false;

        for item in items.iter().skip(skip) {
            if self.shutdown.is_cancelled() {
                // Finish the current item, persist the counters, and leave
                // the task in processing; startup recovery re-queues it
                interrupted = true;
                break;
            }

            match self
                .expand_item(&task, item, &options, &mut spacing_gates)
                .await
            {
                Ok(job) => buffer.push(job),
                Err(reason) => {
                    tracing::debug!(
                        task_id = task.id,
                        provider = %item.provider,
                        external_id = %item.external_id,
                        reason,
                        "bulk item failed"
                    );
                    failed += 1;
                }
            }

            if buffer.len() >= INSERT_CHUNK
                && !self
                    .flush(&task, &mut buffer, &mut processed, failed)
                    .await
            {
                return;
            }
        }

        if !buffer.is_empty()
            && !self
                .flush(&task, &mut buffer, &mut processed, failed)
                .await
        {
            return;
        }

        if interrupted {
            if let Err(e) = self.db.bump_bulk_progress(task.id, processed, failed).await {
                tracing::error!(task_id = task.id, error = %e, "bulk progress update failed");
            }
            tracing::info!(
                task_id = task.id,
                processed,
                failed,
                "bulk task interrupted by shutdown"
            );
            return;
        }

        if let Err(e) = self.db.complete_bulk_task(task.id, processed, failed).await {
            tracing::error!(task_id = task.id, error = %e, "failed to complete bulk task");
            return;
        }

        tracing::info!(task_id = task.id, processed, failed, "bulk task completed");
        let payload = serde_json::json!({"processed": processed, "failed": failed});
        if let Err(e) = self
            .db
            .insert_audit(
                "bulk-resolver",
                "bulk.completed",
                "bulk_task",
                Some(&task.id.to_string()),
                Some(&payload),
            )
            .await
        {
            tracing::error!(error = %e, "failed to audit bulk completion");
        }
    }

    /// Turn one submitted item into an insertable job
    async fn expand_item(
        &self,
        task: &BulkTaskRow,
        item: &BulkItem,
        options: &BulkOptions,
        spacing_gates: &mut HashMap<String, Instant>,
    ) -> Result<NewJob, String> {
        let Some(handle) = self.registry.get(&item.provider).await else {
            return Err(format!("unknown provider: {}", item.provider));
        };

        if self.coordination.find_backoff(&item.provider).await.is_some() {
            // The batch does not stall on a backed-off provider
            return Err("provider backing off".into());
        }

        self.apply_spacing(&item.provider, spacing_gates).await;

        // Prefer the best stream variant when the provider can list them;
        // otherwise resolvability is merely required, not exercised (URL
        // resolution happens at admission time).
        let mut external_id = item.external_id.clone();
        let mut metadata = item.hints.clone().unwrap_or(serde_json::json!({}));

        if let Some(listable) = handle.variant_listable() {
            match listable.variants(&item.external_id).await {
                Ok(variants) => {
                    if let Some(best) = variants
                        .iter()
                        .max_by_key(|v| v.size_bytes.unwrap_or(0))
                    {
                        external_id = best.id.clone();
                        if let Some(map) = metadata.as_object_mut() {
                            map.insert("quality".into(), serde_json::json!(best.quality));
                            if let Some(size) = best.size_bytes {
                                map.insert("size_bytes".into(), serde_json::json!(size));
                            }
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    if let Err(err) = self
                        .coordination
                        .note_transient_failure(&item.provider, &e.to_string(), e.retry_after())
                        .await
                    {
                        tracing::error!(error = %err, "failed to install backoff");
                    }
                    return Err(format!("transient provider error: {e}"));
                }
                Err(e) => return Err(format!("provider error: {e}")),
            }
        } else if handle.resolvable().is_none() {
            return Err("provider cannot resolve downloads".into());
        }

        let title = item
            .hints
            .as_ref()
            .and_then(|h| h.get("title"))
            .and_then(|t| t.as_str())
            .unwrap_or(&item.external_id)
            .to_string();

        Ok(NewJob {
            user_id: task.user_id,
            provider_id: handle.id,
            provider_key: item.provider.clone(),
            external_id,
            title,
            category: options.category.unwrap_or_default(),
            metadata: Some(metadata),
            priority: options.priority.unwrap_or(100),
        })
    }

    /// Insert the buffered jobs; false means the task was failed fatally
    async fn flush(
        &self,
        task: &BulkTaskRow,
        buffer: &mut Vec<NewJob>,
        processed: &mut u32,
        failed: u32,
    ) -> bool {
        let batch = std::mem::take(buffer);
        let count = batch.len() as u32;

        match self.db.insert_jobs(&batch).await {
            Ok(_ids) => {
                *processed += count;
                self.queue_wake.notify_one();
                if let Err(e) = self
                    .db
                    .bump_bulk_progress(task.id, *processed, failed)
                    .await
                {
                    tracing::error!(task_id = task.id, error = %e, "bulk progress update failed");
                }
                true
            }
            Err(e) => {
                // The store refusing a whole chunk is fatal for the task
                self.finish_failed(task, *processed, failed + count, &e.to_string())
                    .await;
                false
            }
        }
    }

    async fn finish_failed(&self, task: &BulkTaskRow, processed: u32, failed: u32, error: &str) {
        tracing::warn!(task_id = task.id, error, "bulk task failed");
        if let Err(e) = self
            .db
            .fail_bulk_task(task.id, processed, failed, error)
            .await
        {
            tracing::error!(task_id = task.id, error = %e, "failed to record bulk failure");
        }
    }

    /// Per-provider spacing, mirroring the scheduler's resolution gate
    async fn apply_spacing(&self, provider_key: &str, gates: &mut HashMap<String, Instant>) {
        let spacing = Duration::from_secs(
            self.config
                .provider_settings(provider_key)
                .download_spacing_seconds,
        );
        if spacing.is_zero() {
            return;
        }

        if let Some(last) = gates.get(provider_key) {
            let wait = spacing.saturating_sub(last.elapsed());
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
        gates.insert(provider_key.to_string(), Instant::now());
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use crate::db::tests::{seed_provider, seed_user, test_db};
    use crate::providers::{ProviderHandle, Variant};
    use crate::test_support::{FixedVariants, ScriptedResolver};
    use crate::types::{BulkTaskStatus, JobStatus};

    struct Fixture {
        resolver: BulkResolver,
        db: Arc<Database>,
        coordination: Arc<Coordination>,
        user: i64,
    }

    async fn fixture(handles: Vec<ProviderHandle>) -> Fixture {
        let mut config = Config::default();
        config.providers.insert(
            "webshare".into(),
            ProviderSettings {
                download_spacing_seconds: 0,
                ..Default::default()
            },
        );
        let config = Arc::new(config);

        let db = Arc::new(test_db().await);
        let user = seed_user(&db, "alice", "user").await;

        let registry = Arc::new(Registry::with_handles(handles));
        let coordination = Arc::new(
            Coordination::load(db.clone(), config.clone()).await.unwrap(),
        );

        let resolver = BulkResolver::new(
            db.clone(),
            registry,
            coordination.clone(),
            config,
            CancellationToken::new(),
            Arc::new(Notify::new()),
        );

        Fixture {
            resolver,
            db,
            coordination,
            user,
        }
    }

    fn items_json(count: usize) -> String {
        let items: Vec<serde_json::Value> = (0..count)
            .map(|i| {
                serde_json::json!({
                    "provider": "webshare",
                    "external_id": format!("item-{i}"),
                    "hints": {"title": format!("Title {i}")},
                })
            })
            .collect();
        serde_json::to_string(&items).unwrap()
    }

    #[tokio::test]
    async fn empty_queue_processes_nothing() {
        let fx = fixture(vec![]).await;
        assert!(!fx.resolver.process_next().await.unwrap());
    }

    #[tokio::test]
    async fn resolvable_items_expand_into_queued_jobs() {
        let fx = fixture(vec![]).await;
        let provider = seed_provider(&fx.db, "webshare").await;
        fx.resolver
            .registry
            .insert(
                ProviderHandle::new(provider, "webshare")
                    .with_resolve(ScriptedResolver::always("https://dl.example")),
            )
            .await;

        let task_id = fx
            .db
            .insert_bulk_task(fx.user, &items_json(3), None, 3)
            .await
            .unwrap();

        assert!(fx.resolver.process_next().await.unwrap());

        let task = fx.db.get_bulk_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status(), BulkTaskStatus::Completed);
        assert_eq!(task.processed_items, 3);
        assert_eq!(task.failed_items, 0);

        let (rows, total) = fx.db.list_paged(None, 10, 0).await.unwrap();
        assert_eq!(total, 3);
        for row in rows {
            assert_eq!(row.status(), JobStatus::Queued);
            assert!(row.title.starts_with("Title "));
        }
    }

    #[tokio::test]
    async fn unknown_provider_items_are_counted_failed() {
        let fx = fixture(vec![]).await;
        let task_id = fx
            .db
            .insert_bulk_task(fx.user, &items_json(2), None, 2)
            .await
            .unwrap();

        fx.resolver.process_next().await.unwrap();

        let task = fx.db.get_bulk_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status(), BulkTaskStatus::Completed);
        assert_eq!(task.processed_items, 0);
        assert_eq!(task.failed_items, 2);
        assert_eq!(
            task.processed_items + task.failed_items,
            task.total_items,
            "terminal accounting must balance"
        );
    }

    #[tokio::test]
    async fn variants_pick_the_largest_stream() {
        let fx = fixture(vec![]).await;
        let provider = seed_provider(&fx.db, "webshare").await;
        fx.resolver
            .registry
            .insert(
                ProviderHandle::new(provider, "webshare")
                    .with_resolve(ScriptedResolver::always("https://dl.example"))
                    .with_variants(Arc::new(FixedVariants(vec![
                        Variant {
                            id: "v-small".into(),
                            quality: "720p".into(),
                            size_bytes: Some(1_000),
                            bitrate_kbps: None,
                            duration_seconds: None,
                            audio_codec: None,
                        },
                        Variant {
                            id: "v-big".into(),
                            quality: "1080p".into(),
                            size_bytes: Some(9_000),
                            bitrate_kbps: None,
                            duration_seconds: None,
                            audio_codec: None,
                        },
                    ]))),
            )
            .await;

        fx.db
            .insert_bulk_task(fx.user, &items_json(1), None, 1)
            .await
            .unwrap();
        fx.resolver.process_next().await.unwrap();

        let (rows, _) = fx.db.list_paged(None, 10, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].external_id, "v-big",
            "the preferred stream is the largest variant"
        );
        let meta: serde_json::Value =
            serde_json::from_str(rows[0].metadata.as_deref().unwrap()).unwrap();
        assert_eq!(meta["quality"], "1080p");
    }

    #[tokio::test]
    async fn backed_off_provider_fails_items_without_stalling() {
        let fx = fixture(vec![]).await;
        let provider = seed_provider(&fx.db, "webshare").await;
        fx.resolver
            .registry
            .insert(
                ProviderHandle::new(provider, "webshare")
                    .with_resolve(ScriptedResolver::always("https://dl.example")),
            )
            .await;

        fx.coordination
            .note_transient_failure("webshare", "rate limited", None)
            .await
            .unwrap();

        let task_id = fx
            .db
            .insert_bulk_task(fx.user, &items_json(3), None, 3)
            .await
            .unwrap();
        fx.resolver.process_next().await.unwrap();

        let task = fx.db.get_bulk_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status(), BulkTaskStatus::Completed);
        assert_eq!(task.failed_items, 3, "items fail fast during a backoff");
    }

    #[tokio::test]
    async fn reset_task_resumes_at_the_recorded_item() {
        let fx = fixture(vec![]).await;
        let provider = seed_provider(&fx.db, "webshare").await;
        fx.resolver
            .registry
            .insert(
                ProviderHandle::new(provider, "webshare")
                    .with_resolve(ScriptedResolver::always("https://dl.example")),
            )
            .await;

        let task_id = fx
            .db
            .insert_bulk_task(fx.user, &items_json(3), None, 3)
            .await
            .unwrap();

        // A previous run accounted for the first two items before dying
        fx.db.claim_pending_bulk_task().await.unwrap();
        fx.db.bump_bulk_progress(task_id, 1, 1).await.unwrap();
        fx.db.requeue_stuck_bulk_tasks().await.unwrap();

        assert!(fx.resolver.process_next().await.unwrap());

        let task = fx.db.get_bulk_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status(), BulkTaskStatus::Completed);
        assert_eq!(task.processed_items, 2);
        assert_eq!(task.failed_items, 1);
        assert_eq!(
            task.processed_items + task.failed_items,
            task.total_items,
            "terminal accounting must balance after a resume"
        );

        // Only the resumed item became a job; nothing was expanded twice
        let (_, total) = fx.db.list_paged(None, 10, 0).await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn invalid_payload_fails_the_task() {
        let fx = fixture(vec![]).await;
        let task_id = fx
            .db
            .insert_bulk_task(fx.user, "this is not json", None, 0)
            .await
            .unwrap();

        fx.resolver.process_next().await.unwrap();

        let task = fx.db.get_bulk_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status(), BulkTaskStatus::Failed);
        assert!(task.error_text.as_deref().unwrap().contains("invalid payload"));
    }

    #[tokio::test]
    async fn category_and_priority_options_apply_to_created_jobs() {
        let fx = fixture(vec![]).await;
        let provider = seed_provider(&fx.db, "webshare").await;
        fx.resolver
            .registry
            .insert(
                ProviderHandle::new(provider, "webshare")
                    .with_resolve(ScriptedResolver::always("https://dl.example")),
            )
            .await;

        fx.db
            .insert_bulk_task(
                fx.user,
                &items_json(1),
                Some(r#"{"category":"TV","priority":5}"#),
                1,
            )
            .await
            .unwrap();
        fx.resolver.process_next().await.unwrap();

        let (rows, _) = fx.db.list_paged(None, 10, 0).await.unwrap();
        assert_eq!(rows[0].category, "TV");
        assert_eq!(rows[0].priority, 5);
    }
}
