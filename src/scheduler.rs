//! Admission scheduler: binds queued jobs to the transfer daemon.
//!
//! A single long-lived loop per node. Each tick it computes the remaining
//! admission capacity, checks the free-space floor, snapshots the pause and
//! backoff maps, atomically claims the next runnable jobs, resolves each
//! one's direct URL through its provider, and hands the URL to the daemon.
//! Transient failures send a job back to `queued` with a provider backoff;
//! permanent failures end it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordination::Coordination;
use crate::db::{Database, JobRow};
use crate::downloader::{AddUriOptions, TransferClient};
use crate::error::ProviderError;
use crate::events::EventBus;
use crate::providers::Registry;
use crate::retry::{busy_to_unavailable, with_retry};
use crate::types::{Event, JobStatus};

/// Interval between admission ticks when nothing wakes the loop early
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How long the whole scheduler holds off after the daemon proves
/// unreachable, so every queued job does not burn a claim cycle against a
/// dead daemon
const DAEMON_HOLD: Duration = Duration::from_secs(5);

/// The admission scheduler (one instance per node)
pub struct Scheduler {
    db: Arc<Database>,
    registry: Arc<Registry>,
    coordination: Arc<Coordination>,
    transfer: Arc<dyn TransferClient>,
    events: EventBus,
    config: Arc<Config>,
    shutdown: CancellationToken,
    wake: Arc<Notify>,
    last_resolution: Mutex<HashMap<String, Instant>>,
    daemon_hold_until: Mutex<Option<Instant>>,
    blocked_streak: std::sync::atomic::AtomicBool,
}

impl Scheduler {
    /// Wire up a scheduler; `wake` is notified on every queue insert
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        registry: Arc<Registry>,
        coordination: Arc<Coordination>,
        transfer: Arc<dyn TransferClient>,
        events: EventBus,
        config: Arc<Config>,
        shutdown: CancellationToken,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            db,
            registry,
            coordination,
            transfer,
            events,
            config,
            shutdown,
            wake,
            last_resolution: Mutex::new(HashMap::new()),
            daemon_hold_until: Mutex::new(None),
            blocked_streak: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Spawn the admission loop
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("scheduler started");
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        tracing::info!("scheduler stopping");
                        break;
                    }
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(TICK_INTERVAL) => {}
                }

                if self.shutdown.is_cancelled() {
                    break;
                }

                if let Err(e) = self.tick().await {
                    tracing::error!(error = %e, "scheduler tick failed");
                }
            }
        })
    }

    /// One admission pass
    pub(crate) async fn tick(&self) -> crate::error::Result<()> {
        // A recent daemon transport failure holds the whole loop briefly
        if let Some(until) = *self.daemon_hold_until.lock().await
            && Instant::now() < until
        {
            return Ok(());
        }

        let admitted = self.db.count_admitted().await?;
        let capacity = self
            .config
            .app
            .max_active_downloads
            .saturating_sub(admitted.max(0) as usize);
        if capacity == 0 {
            return Ok(());
        }

        if !self.check_free_space()? {
            return Ok(());
        }

        let mut excluded = self.coordination.paused_keys().await;
        excluded.extend(self.coordination.backed_off_keys().await);
        excluded.sort();
        excluded.dedup();

        // Claim contention retries briefly; a lock that never clears is
        // surfaced rather than spun on
        let claimed = with_retry(&self.config.retry, || {
            self.db.claim_next_runnable(capacity, &excluded)
        })
        .await
        .map_err(busy_to_unavailable)?;
        if claimed.is_empty() {
            return Ok(());
        }

        let claimed_count = claimed.len();
        for job in claimed {
            if self.shutdown.is_cancelled() {
                // Stop binding new work; the claimed rows go back to queued
                self.requeue_quietly(&job, None).await;
                continue;
            }
            self.admit(job).await;
        }

        tracing::debug!(claimed = claimed_count, "admission tick complete");
        Ok(())
    }

    /// Free-space gate. Emits one `scheduler.blocked` event per blocked
    /// streak rather than one per tick.
    fn check_free_space(&self) -> crate::error::Result<bool> {
        use std::sync::atomic::Ordering;

        let required = self.config.min_free_space_bytes();
        if required == 0 {
            return Ok(true);
        }

        let available = match crate::utils::available_space(&self.config.paths.downloads) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "free-space check failed, blocking admission");
                return Ok(false);
            }
        };

        if available < required {
            if !self.blocked_streak.swap(true, Ordering::SeqCst) {
                tracing::warn!(
                    available_bytes = available,
                    required_bytes = required,
                    "admission blocked on low disk space"
                );
                self.events.publish(Event::SchedulerBlocked {
                    reason: "insufficient free space on downloads path".into(),
                    available_bytes: available,
                    required_bytes: required,
                });
            }
            return Ok(false);
        }

        self.blocked_streak.store(false, Ordering::SeqCst);
        Ok(true)
    }

    /// Drive one claimed job from `starting` to `downloading` (or back out)
    async fn admit(&self, job: JobRow) {
        let provider_key = job.provider_key.clone();

        // The pause table may have changed between claim and now
        if self.coordination.find_pause(&provider_key).await.is_some() {
            self.requeue_quietly(&job, None).await;
            return;
        }

        let Some(handle) = self.registry.get(&provider_key).await else {
            self.fail(&job, "provider not available").await;
            return;
        };
        let Some(resolvable) = handle.resolvable() else {
            self.fail(&job, "provider cannot resolve downloads").await;
            return;
        };

        self.apply_spacing_gate(&provider_key).await;

        match resolvable.resolve_download_url(&job.external_id).await {
            Ok(source) => {
                if let Err(e) = self.coordination.clear_backoff_on_success(&provider_key).await {
                    tracing::error!(error = %e, "failed to clear backoff");
                }
                self.bind(job, source).await;
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    job_id = job.id.get(),
                    provider = %provider_key,
                    error = %e,
                    "transient resolution failure, requeueing"
                );
                if let Err(err) = self
                    .coordination
                    .note_transient_failure(&provider_key, &e.to_string(), e.retry_after())
                    .await
                {
                    tracing::error!(error = %err, "failed to install backoff");
                }
                self.requeue_quietly(&job, Some(&transient_reason(&e))).await;
            }
            Err(e) => {
                tracing::warn!(
                    job_id = job.id.get(),
                    provider = %provider_key,
                    error = %e,
                    "permanent resolution failure"
                );
                self.fail(&job, &e.to_string()).await;
            }
        }
    }

    /// Hand the resolved URL to the daemon and flip the job to downloading
    async fn bind(&self, job: JobRow, source: crate::providers::ResolvedSource) {
        let options = self.build_options(&job);
        let url = source.primary().to_string();

        match self.transfer.add_uri(std::slice::from_ref(&url), options).await {
            Ok(gid) => {
                if !source.alternates().is_empty() {
                    let alternates: Vec<String> =
                        source.alternates().iter().map(|u| u.to_string()).collect();
                    if let Err(e) = self
                        .db
                        .merge_metadata_key(
                            job.id,
                            "source_url_alternates",
                            &serde_json::json!(alternates),
                        )
                        .await
                    {
                        tracing::error!(error = %e, "failed to store alternate URLs");
                    }
                }

                let tmp = self.config.paths.downloads.to_string_lossy().to_string();
                match self.db.mark_downloading(job.id, gid.as_str(), &url, &tmp).await {
                    Ok(Some(row)) => {
                        tracing::info!(
                            job_id = row.id.get(),
                            handle = %gid,
                            "job bound to downloader"
                        );
                        self.events.publish(Event::JobUpdated { job: row.to_info() });
                    }
                    Ok(None) => {
                        // Canceled between claim and bind; release the transfer
                        tracing::info!(job_id = job.id.get(), "job vanished before bind, removing transfer");
                        let _ = self.transfer.remove(&gid).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to persist downloading transition");
                        let _ = self.transfer.remove(&gid).await;
                    }
                }
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "daemon unreachable, holding admission");
                *self.daemon_hold_until.lock().await = Some(Instant::now() + DAEMON_HOLD);
                self.requeue_quietly(&job, Some("downloader unreachable, retrying")).await;
            }
            Err(e) => {
                self.fail(&job, &format!("downloader rejected the transfer: {e}"))
                    .await;
            }
        }
    }

    /// Daemon options for one job: global speed cap unless the job's
    /// metadata carries its own `rate_limit_bps`.
    fn build_options(&self, job: &JobRow) -> AddUriOptions {
        let per_job_limit = job
            .metadata
            .as_deref()
            .and_then(|m| serde_json::from_str::<serde_json::Value>(m).ok())
            .and_then(|m| m.get("rate_limit_bps").and_then(|v| v.as_u64()));

        AddUriOptions {
            dir: Some(self.config.paths.downloads.clone()),
            out: None,
            max_download_limit: per_job_limit.or_else(|| self.config.downloader.max_speed_bps()),
            check_integrity: false,
            continue_partial: true,
        }
    }

    /// Enforce the per-provider minimum interval between resolutions
    async fn apply_spacing_gate(&self, provider_key: &str) {
        let spacing = Duration::from_secs(
            self.config
                .provider_settings(provider_key)
                .download_spacing_seconds,
        );
        if spacing.is_zero() {
            return;
        }

        let wait = {
            let gates = self.last_resolution.lock().await;
            gates
                .get(provider_key)
                .map(|last| spacing.saturating_sub(last.elapsed()))
                .filter(|d| !d.is_zero())
        };

        if let Some(wait) = wait {
            tracing::debug!(provider = provider_key, wait_ms = wait.as_millis(), "spacing gate");
            tokio::time::sleep(wait).await;
        }

        self.last_resolution
            .lock()
            .await
            .insert(provider_key.to_string(), Instant::now());
    }

    /// Put a claimed job back in the queue, publishing the update
    async fn requeue_quietly(&self, job: &JobRow, reason: Option<&str>) {
        match self
            .db
            .requeue(job.id, &[JobStatus::Starting], reason)
            .await
        {
            Ok(Some(row)) => {
                self.events.publish(Event::JobUpdated { job: row.to_info() });
            }
            Ok(None) => {}
            Err(e) => tracing::error!(job_id = job.id.get(), error = %e, "requeue failed"),
        }
    }

    /// End a claimed job permanently
    async fn fail(&self, job: &JobRow, error_text: &str) {
        match self
            .db
            .mark_failed(job.id, &[JobStatus::Starting], error_text)
            .await
        {
            Ok(Some(row)) => {
                let payload = serde_json::json!({"error": error_text});
                if let Err(e) = self
                    .db
                    .insert_audit(
                        "scheduler",
                        "job.failed",
                        "job",
                        Some(&row.id.to_string()),
                        Some(&payload),
                    )
                    .await
                {
                    tracing::error!(error = %e, "failed to audit job failure");
                }
                if let Err(e) = self
                    .db
                    .insert_notification(row.user_id, "job.failed", Some(&payload.to_string()))
                    .await
                {
                    tracing::error!(error = %e, "failed to record notification");
                }
                self.events.publish(Event::JobFailed { job: row.to_info() });
            }
            Ok(None) => {}
            Err(e) => tracing::error!(job_id = job.id.get(), error = %e, "failure transition failed"),
        }
    }
}

/// User-facing reason for a transient requeue
fn transient_reason(e: &ProviderError) -> String {
    match e {
        ProviderError::RateLimited { .. } => "rate limited, retrying".to_string(),
        ProviderError::AuthExpired => "provider session expired, retrying".to_string(),
        other => format!("{other}, retrying"),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
