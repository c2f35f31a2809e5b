//! Progress worker: drives active jobs to terminal states.
//!
//! Runs independently of the scheduler on its own timer. Each tick it polls
//! the daemon for every job holding a handle, maps daemon states onto the
//! job state machine, enforces provider pauses on running transfers, and
//! finalizes completed transfers into the library. A periodic reconcile
//! pass purges daemon transfers no job owns and fails jobs whose daemon
//! state is gone.

mod finalize;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordination::Coordination;
use crate::db::{Database, JobRow};
use crate::downloader::{DaemonState, DaemonStatus, Handle, TransferClient};
use crate::error::DownloaderError;
use crate::events::EventBus;
use crate::media_server::MediaServerClient;
use crate::types::{Event, JobId, JobStatus, PauseSource};

/// Interval between progress ticks
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum gap between `job.updated` events for one job, protecting
/// subscribers from progress spam. Terminal events always pass.
const PUBLISH_MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Reconcile every Nth tick
const RECONCILE_EVERY: u64 = 10;

/// Upper bound for a sane ETA; beyond this the estimate is noise
const MAX_ETA: Duration = Duration::from_secs(30 * 24 * 3600);

/// The progress-tracking worker
pub struct Worker {
    db: Arc<Database>,
    transfer: Arc<dyn TransferClient>,
    coordination: Arc<Coordination>,
    events: EventBus,
    config: Arc<Config>,
    media: Arc<MediaServerClient>,
    shutdown: CancellationToken,
    last_publish: Mutex<HashMap<JobId, Instant>>,
    ticks: AtomicU64,
}

impl Worker {
    /// Wire up a worker
    pub fn new(
        db: Arc<Database>,
        transfer: Arc<dyn TransferClient>,
        coordination: Arc<Coordination>,
        events: EventBus,
        config: Arc<Config>,
        media: Arc<MediaServerClient>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            transfer,
            coordination,
            events,
            config,
            media,
            shutdown,
            last_publish: Mutex::new(HashMap::new()),
            ticks: AtomicU64::new(0),
        }
    }

    /// Spawn the progress loop
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("worker started");
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        tracing::info!("worker stopping");
                        break;
                    }
                    _ = tokio::time::sleep(TICK_INTERVAL) => {}
                }

                // Finish the in-flight cycle even when shutdown raced the timer
                if let Err(e) = self.tick().await {
                    tracing::error!(error = %e, "worker tick failed");
                }

                if self.shutdown.is_cancelled() {
                    break;
                }
            }
        })
    }

    /// One progress pass over all active jobs
    pub(crate) async fn tick(&self) -> crate::error::Result<()> {
        let active = self.db.active_jobs().await?;
        let paused_providers: HashSet<String> =
            self.coordination.paused_keys().await.into_iter().collect();

        for job in active {
            match job.status() {
                // The scheduler owns jobs mid-claim
                JobStatus::Starting => {}
                JobStatus::Downloading => {
                    if paused_providers.contains(&job.provider_key) {
                        self.pause_for_provider(&job).await;
                    } else {
                        self.poll(&job).await;
                    }
                }
                JobStatus::Paused => {
                    let provider_pause_lifted = job.pause_source()
                        == Some(PauseSource::Provider)
                        && !paused_providers.contains(&job.provider_key);
                    if provider_pause_lifted {
                        self.resume_after_provider(&job).await;
                    } else {
                        self.poll_paused(&job).await;
                    }
                }
                _ => {}
            }
        }

        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if tick % RECONCILE_EVERY == 0 {
            self.reconcile().await;
        }

        Ok(())
    }

    /// Daemon-pause a downloading job whose provider was paused
    async fn pause_for_provider(&self, job: &JobRow) {
        let Some(handle) = job.downloader_handle.as_deref().map(Handle::from) else {
            return;
        };

        if let Err(e) = self.transfer.pause(&handle).await {
            tracing::warn!(job_id = job.id.get(), error = %e, "daemon pause failed");
        }

        match self.db.mark_paused(job.id, PauseSource::Provider).await {
            Ok(Some(row)) => {
                tracing::info!(job_id = row.id.get(), provider = %row.provider_key, "job paused with its provider");
                self.events.publish(Event::JobPaused { job: row.to_info() });
            }
            Ok(None) => {}
            Err(e) => tracing::error!(job_id = job.id.get(), error = %e, "pause transition failed"),
        }
    }

    /// Resume a provider-paused job once the pause clears
    async fn resume_after_provider(&self, job: &JobRow) {
        let Some(handle) = job.downloader_handle.as_deref().map(Handle::from) else {
            // Handle lost while paused; back to the queue with stored order keys
            if let Ok(Some(row)) = self
                .db
                .requeue(job.id, &[JobStatus::Paused], None)
                .await
            {
                self.events.publish(Event::JobUpdated { job: row.to_info() });
            }
            return;
        };

        if let Err(e) = self.transfer.unpause(&handle).await {
            tracing::warn!(job_id = job.id.get(), error = %e, "daemon unpause failed");
            return;
        }

        match self.db.mark_resumed(job.id).await {
            Ok(Some(row)) => {
                tracing::info!(job_id = row.id.get(), "job resumed with its provider");
                self.events.publish(Event::JobResumed { job: row.to_info() });
            }
            Ok(None) => {}
            Err(e) => tracing::error!(job_id = job.id.get(), error = %e, "resume transition failed"),
        }
    }

    /// Poll one downloading job and map the daemon state onto the row
    async fn poll(&self, job: &JobRow) {
        let Some(handle) = job.downloader_handle.as_deref().map(Handle::from) else {
            return;
        };

        let status = match self.transfer.status(&handle).await {
            Ok(status) => status,
            Err(DownloaderError::Rpc { message, .. }) if message.contains("not found") => {
                // The daemon forgot the transfer (restart, manual purge)
                self.fail_job(job, "downloader state lost").await;
                return;
            }
            Err(e) => {
                tracing::warn!(job_id = job.id.get(), error = %e, "status poll failed");
                return;
            }
        };

        match status.state {
            DaemonState::Active | DaemonState::Waiting => {
                self.record_progress(job, &handle, &status).await;
            }
            DaemonState::Paused => {
                // Paused on the daemon side without a provider pause; mirror it
                match self.db.mark_paused(job.id, PauseSource::User).await {
                    Ok(Some(row)) => {
                        self.events.publish(Event::JobPaused { job: row.to_info() });
                    }
                    Ok(None) => {}
                    Err(e) => tracing::error!(error = %e, "pause transition failed"),
                }
            }
            DaemonState::Complete => {
                self.finish(job, &handle, &status).await;
            }
            DaemonState::Error => {
                self.handle_daemon_error(job, &handle, &status).await;
            }
            DaemonState::Removed => {
                self.cancel_job(job).await;
            }
        }
    }

    /// Poll a paused job just enough to notice errors and removals
    async fn poll_paused(&self, job: &JobRow) {
        let Some(handle) = job.downloader_handle.as_deref().map(Handle::from) else {
            return;
        };

        let status = match self.transfer.status(&handle).await {
            Ok(status) => status,
            Err(_) => return,
        };

        match status.state {
            DaemonState::Error => self.handle_daemon_error(job, &handle, &status).await,
            DaemonState::Removed => self.cancel_job(job).await,
            _ => {}
        }
    }

    /// Persist progress and publish a rate-limited update.
    ///
    /// A downloading row never shows 100: the daemon can sit at
    /// completed == total while still `active` (integrity verification),
    /// and the 100.0 write belongs to the completion transition.
    async fn record_progress(&self, job: &JobRow, handle: &Handle, status: &DaemonStatus) {
        let progress = if status.total_bytes > 0 {
            ((status.completed_bytes as f32 / status.total_bytes as f32) * 100.0).min(99.9)
        } else {
            0.0
        };
        let eta = compute_eta(status);

        let changed = match self
            .db
            .update_progress(
                job.id,
                handle.as_str(),
                progress,
                status.download_speed_bps,
                eta,
            )
            .await
        {
            Ok(changed) => changed,
            Err(e) => {
                tracing::error!(job_id = job.id.get(), error = %e, "progress update failed");
                return;
            }
        };

        if changed && self.should_publish(job.id).await {
            if let Ok(Some(row)) = self.db.get_job(job.id).await {
                self.events.publish(Event::JobUpdated { job: row.to_info() });
            }
        }
    }

    /// Attempt finalization; completion only lands after the library move
    async fn finish(&self, job: &JobRow, handle: &Handle, status: &DaemonStatus) {
        match self.finalize(job, status).await {
            Ok(row) => {
                let _ = self.transfer.purge(handle).await;
                tracing::info!(
                    job_id = row.id.get(),
                    final_path = row.final_path.as_deref().unwrap_or(""),
                    "job completed"
                );
                let payload = serde_json::json!({
                    "final_path": row.final_path,
                    "file_size_bytes": row.file_size_bytes,
                });
                self.audit_and_notify(&row, "job.completed", &payload).await;
                self.events.publish(Event::JobCompleted { job: row.to_info() });
            }
            Err(e) => {
                // The temp file stays where it is for operator inspection
                let _ = self.transfer.purge(handle).await;
                tracing::error!(job_id = job.id.get(), error = %e, "finalization failed");
                self.fail_job(job, &format!("finalization failed: {e}")).await;
            }
        }
    }

    /// Map a daemon-reported failure onto the error taxonomy
    async fn handle_daemon_error(&self, job: &JobRow, handle: &Handle, status: &DaemonStatus) {
        let code = status.error_code.as_deref().unwrap_or("");
        let message = status.error_message.as_deref().unwrap_or("transfer failed");

        let _ = self.transfer.purge(handle).await;

        if daemon_error_is_transient(code, message) {
            tracing::warn!(
                job_id = job.id.get(),
                code,
                message,
                "transient daemon failure, requeueing"
            );
            if let Err(e) = self
                .coordination
                .note_transient_failure(&job.provider_key, message, None)
                .await
            {
                tracing::error!(error = %e, "failed to install backoff");
            }
            match self
                .db
                .requeue(
                    job.id,
                    &[JobStatus::Downloading, JobStatus::Paused],
                    Some(&format!("{message}, retrying")),
                )
                .await
            {
                Ok(Some(row)) => {
                    self.events.publish(Event::JobUpdated { job: row.to_info() });
                }
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "requeue failed"),
            }
        } else {
            self.fail_job(job, message).await;
        }
    }

    /// Daemon removed the transfer: cancel the job unless already terminal
    async fn cancel_job(&self, job: &JobRow) {
        match self.db.mark_canceled(job.id).await {
            Ok(Some(row)) => {
                tracing::info!(job_id = row.id.get(), "job canceled (transfer removed)");
                self.audit_and_notify(&row, "job.canceled", &serde_json::json!({}))
                    .await;
                self.events.publish(Event::JobCanceled { job: row.to_info() });
            }
            Ok(None) => {}
            Err(e) => tracing::error!(job_id = job.id.get(), error = %e, "cancel transition failed"),
        }
    }

    /// Permanent failure path shared by poll and finalization
    async fn fail_job(&self, job: &JobRow, error_text: &str) {
        match self
            .db
            .mark_failed(
                job.id,
                &[JobStatus::Downloading, JobStatus::Paused],
                error_text,
            )
            .await
        {
            Ok(Some(row)) => {
                let payload = serde_json::json!({"error": error_text});
                self.audit_and_notify(&row, "job.failed", &payload).await;
                self.events.publish(Event::JobFailed { job: row.to_info() });
            }
            Ok(None) => {}
            Err(e) => tracing::error!(job_id = job.id.get(), error = %e, "failure transition failed"),
        }
    }

    /// Audit a terminal transition and leave the owner a notification
    async fn audit_and_notify(&self, row: &JobRow, action: &str, payload: &serde_json::Value) {
        if let Err(e) = self
            .db
            .insert_audit(
                "worker",
                action,
                "job",
                Some(&row.id.to_string()),
                Some(payload),
            )
            .await
        {
            tracing::error!(error = %e, "failed to audit transition");
        }
        if let Err(e) = self
            .db
            .insert_notification(row.user_id, action, Some(&payload.to_string()))
            .await
        {
            tracing::error!(error = %e, "failed to record notification");
        }
    }

    /// Rate limit for per-job progress events
    async fn should_publish(&self, id: JobId) -> bool {
        let mut last = self.last_publish.lock().await;
        let now = Instant::now();
        match last.get(&id) {
            Some(at) if now.duration_since(*at) < PUBLISH_MIN_INTERVAL => false,
            _ => {
                last.insert(id, now);
                true
            }
        }
    }

    /// Drop handles no job owns and fail jobs whose daemon state is gone
    pub(crate) async fn reconcile(&self) {
        let daemon_handles = match self.transfer.tell_active().await {
            Ok(handles) => handles,
            Err(e) => {
                tracing::warn!(error = %e, "reconcile skipped, daemon unreachable");
                return;
            }
        };

        let owned: HashSet<String> = match self.db.jobs_with_handles().await {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| row.downloader_handle)
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "reconcile skipped, store unavailable");
                return;
            }
        };

        for handle in daemon_handles {
            if !owned.contains(handle.as_str()) {
                tracing::warn!(handle = %handle, "purging orphaned daemon transfer");
                let _ = self.transfer.remove(&handle).await;
                let _ = self.transfer.purge(&handle).await;
            }
        }

        match self.db.downloading_without_handle().await {
            Ok(rows) => {
                for job in rows {
                    self.fail_job(&job, "downloader state lost").await;
                }
            }
            Err(e) => tracing::error!(error = %e, "handleless sweep failed"),
        }
    }
}

/// ETA from the daemon counters, clamped to a sane range
fn compute_eta(status: &DaemonStatus) -> Option<u64> {
    if status.download_speed_bps == 0 || status.total_bytes == 0 {
        return None;
    }
    let remaining = status.total_bytes.saturating_sub(status.completed_bytes);
    let eta = remaining / status.download_speed_bps;
    Some(eta.min(MAX_ETA.as_secs()))
}

/// Classify a daemon failure. Network-flavored codes and messages are
/// transient; everything else (bad URI, disk errors, auth) fails the job.
fn daemon_error_is_transient(code: &str, message: &str) -> bool {
    if matches!(code, "2" | "5" | "6" | "19") {
        return true;
    }
    let lower = message.to_ascii_lowercase();
    lower.contains("timeout")
        || lower.contains("time-out")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("temporar")
        || lower.contains("resolve host")
}
