//! Job and provider control operations.
//!
//! Every mutation checks ownership (owner or admin), performs its daemon
//! side best-effort where the contract says so, runs the CAS transition,
//! audits, and publishes the matching event.

use std::time::Duration;

use crate::db::JobRow;
use crate::downloader::Handle;
use crate::error::{Error, JobError, Result};
use crate::providers::ProviderStatus;
use crate::types::{Event, Identity, JobId, JobStatus, PauseSource};

use super::MediaDownloader;

/// How long a fetched provider status stays served from cache
const STATUS_CACHE_TTL: Duration = Duration::from_secs(300);

impl MediaDownloader {
    /// Fetch a job, enforcing owner-or-admin access
    pub async fn get_job_authorized(&self, id: JobId, identity: Identity) -> Result<JobRow> {
        let row = self
            .db
            .get_job(id)
            .await?
            .ok_or(Error::Job(JobError::NotFound { id: id.get() }))?;

        if !identity.may_mutate(row.user_id) {
            return Err(Error::Forbidden(format!(
                "job {id} belongs to another user"
            )));
        }
        Ok(row)
    }

    /// Cancel a job. Idempotent on already-canceled jobs; the daemon side
    /// is best-effort (the row transitions regardless).
    pub async fn cancel_job(&self, id: JobId, identity: Identity) -> Result<JobRow> {
        let row = self.get_job_authorized(id, identity).await?;

        match row.status() {
            JobStatus::Canceled => return Ok(row),
            status if status.is_terminal() => {
                return Err(Error::Job(JobError::InvalidState {
                    id: id.get(),
                    operation: "cancel".into(),
                    current_state: status.as_str().into(),
                }));
            }
            _ => {}
        }

        if let Some(handle) = row.downloader_handle.as_deref().map(Handle::from) {
            if let Err(e) = self.transfer.remove(&handle).await {
                tracing::warn!(job_id = id.get(), error = %e, "daemon remove failed during cancel");
            }
            let _ = self.transfer.purge(&handle).await;
        }

        let row = match self.db.mark_canceled(id).await? {
            Some(row) => row,
            // A concurrent transition won; report the row as it is now
            None => self.get_job_authorized(id, identity).await?,
        };

        self.audit(identity, "job.canceled", "job", Some(&id.to_string()), None)
            .await;
        self.events.publish(Event::JobCanceled { job: row.to_info() });
        Ok(row)
    }

    /// Pause a downloading job. Pausing an already-paused job is a no-op.
    pub async fn pause_job(&self, id: JobId, identity: Identity) -> Result<JobRow> {
        let row = self.get_job_authorized(id, identity).await?;

        match row.status() {
            JobStatus::Paused => return Ok(row),
            JobStatus::Downloading => {}
            status => {
                return Err(Error::Job(JobError::InvalidState {
                    id: id.get(),
                    operation: "pause".into(),
                    current_state: status.as_str().into(),
                }));
            }
        }

        if let Some(handle) = row.downloader_handle.as_deref().map(Handle::from)
            && let Err(e) = self.transfer.pause(&handle).await
        {
            tracing::warn!(job_id = id.get(), error = %e, "daemon pause failed");
        }

        let row = self
            .db
            .mark_paused(id, PauseSource::User)
            .await?
            .ok_or(Error::Job(JobError::TransitionConflict {
                id: id.get(),
                expected: "downloading".into(),
                found: "other".into(),
            }))?;

        self.audit(identity, "job.paused", "job", Some(&id.to_string()), None)
            .await;
        self.events.publish(Event::JobPaused { job: row.to_info() });
        Ok(row)
    }

    /// Resume a paused job. With a live daemon handle the transfer resumes
    /// in place; with the handle gone the job re-enters the claimable set
    /// with its stored priority and position.
    pub async fn resume_job(&self, id: JobId, identity: Identity) -> Result<JobRow> {
        let row = self.get_job_authorized(id, identity).await?;

        match row.status() {
            JobStatus::Downloading => return Ok(row),
            JobStatus::Paused => {}
            status => {
                return Err(Error::Job(JobError::InvalidState {
                    id: id.get(),
                    operation: "resume".into(),
                    current_state: status.as_str().into(),
                }));
            }
        }

        let row = match row.downloader_handle.as_deref().map(Handle::from) {
            Some(handle) => {
                if let Err(e) = self.transfer.unpause(&handle).await {
                    tracing::warn!(job_id = id.get(), error = %e, "daemon unpause failed");
                }
                self.db.mark_resumed(id).await?
            }
            None => self.db.requeue(id, &[JobStatus::Paused], None).await?,
        }
        .ok_or(Error::Job(JobError::TransitionConflict {
            id: id.get(),
            expected: "paused".into(),
            found: "other".into(),
        }))?;

        self.audit(identity, "job.resumed", "job", Some(&id.to_string()), None)
            .await;
        self.events.publish(Event::JobResumed { job: row.to_info() });
        Ok(row)
    }

    /// Change a queued job's priority
    pub async fn set_job_priority(
        &self,
        id: JobId,
        identity: Identity,
        priority: i32,
    ) -> Result<JobRow> {
        let row = self.get_job_authorized(id, identity).await?;

        let updated = self.db.set_priority(id, priority).await?.ok_or_else(|| {
            Error::Job(JobError::InvalidState {
                id: id.get(),
                operation: "set priority".into(),
                current_state: row.status().as_str().into(),
            })
        })?;

        self.events.publish(Event::JobUpdated {
            job: updated.to_info(),
        });
        Ok(updated)
    }

    /// Reorder queued jobs. Non-admin callers may only move their own jobs;
    /// ids that are not queued (or not theirs) are silently skipped, like
    /// ids that raced into another state.
    pub async fn reorder_jobs(&self, identity: Identity, ids: &[JobId]) -> Result<usize> {
        let mut eligible = Vec::with_capacity(ids.len());
        for id in ids {
            match self.db.get_job(*id).await? {
                Some(row) if identity.may_mutate(row.user_id) => eligible.push(*id),
                _ => {}
            }
        }

        let applied = self.db.reorder(&eligible).await?;
        let payload = serde_json::json!({"applied": applied});
        self.audit(identity, "queue.reorder", "job", None, Some(&payload))
            .await;
        Ok(applied)
    }

    /// Delete a job. Completed jobs lose their library file and become
    /// `deleted`; non-terminal jobs are canceled and removed from view;
    /// deleting an already-deleted job is a no-op.
    pub async fn delete_job(&self, id: JobId, identity: Identity) -> Result<()> {
        let row = self.get_job_authorized(id, identity).await?;

        match row.status() {
            JobStatus::Deleted => Ok(()),
            JobStatus::Completed => {
                if let Some(final_path) = row.final_path.as_deref() {
                    match tokio::fs::remove_file(final_path).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            tracing::warn!(job_id = id.get(), error = %e, "library file removal failed");
                        }
                    }
                }

                let row = self.db.mark_deleted(id).await?.ok_or(Error::Job(
                    JobError::TransitionConflict {
                        id: id.get(),
                        expected: "completed".into(),
                        found: "other".into(),
                    },
                ))?;

                self.audit(identity, "job.deleted", "job", Some(&id.to_string()), None)
                    .await;
                self.events.publish(Event::JobDeleted { job: row.to_info() });
                Ok(())
            }
            JobStatus::Failed | JobStatus::Canceled => {
                // Nothing to tear down; just confirm removal to the caller
                self.events.publish(Event::JobRemoved {
                    id,
                    user_id: row.user_id,
                });
                Ok(())
            }
            _ => {
                self.cancel_job(id, identity).await?;
                self.events.publish(Event::JobRemoved {
                    id,
                    user_id: row.user_id,
                });
                Ok(())
            }
        }
    }

    /// Pause a provider (admin operation, enforced at the API layer)
    pub async fn pause_provider(
        &self,
        identity: Identity,
        provider_id: i64,
        note: Option<&str>,
    ) -> Result<crate::coordination::PauseEntry> {
        let provider = self
            .db
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("provider {provider_id}")))?;

        let actor = format!("user:{}", identity.user_id);
        let entry = self.coordination.pause(&provider.key, &actor, note).await?;

        self.audit(
            identity,
            "provider.paused",
            "provider",
            Some(&provider.key),
            note.map(|n| serde_json::json!({"note": n})).as_ref(),
        )
        .await;
        self.events.publish(Event::ProviderPaused {
            provider: provider.key,
            paused_by: entry.paused_by.clone(),
            note: entry.note.clone(),
        });
        Ok(entry)
    }

    /// Clear a provider pause (admin operation)
    pub async fn resume_provider(&self, identity: Identity, provider_id: i64) -> Result<()> {
        let provider = self
            .db
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("provider {provider_id}")))?;

        self.coordination.resume(&provider.key).await?;
        self.audit(
            identity,
            "provider.resumed",
            "provider",
            Some(&provider.key),
            None,
        )
        .await;
        self.events.publish(Event::ProviderResumed {
            provider: provider.key,
        });
        Ok(())
    }

    /// Provider account status, served from the coordination cache unless
    /// the caller forces a refresh
    pub async fn provider_status(&self, key: &str, refresh: bool) -> Result<ProviderStatus> {
        if !refresh
            && let Some(cached) = self.coordination.cached_status(key, STATUS_CACHE_TTL).await
        {
            return Ok(cached);
        }

        let handle = self
            .registry
            .get(key)
            .await
            .ok_or_else(|| Error::NotFound(format!("provider {key}")))?;
        let Some(capable) = handle.status_capable() else {
            return Err(Error::Provider(crate::error::ProviderError::Unsupported(
                "status reporting".into(),
            )));
        };

        let status = capable.status().await.map_err(Error::Provider)?;
        self.coordination.store_status(key, status.clone()).await;
        Ok(status)
    }
}
