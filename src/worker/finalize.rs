//! Finalization: promote a completed transfer into the library.
//!
//! Picks the produced file, computes the library destination from the
//! category templates, moves it (rename, falling back to copy + size check
//! + unlink across filesystems), asks the media server to refresh, and only
//! then flips the job to `completed`. A finalization failure fails the job
//! and leaves the temp file in place for inspection.

use std::path::{Component, Path, PathBuf};

use crate::db::JobRow;
use crate::downloader::DaemonStatus;
use crate::error::{Error, FinalizeError, Result};
use crate::library;

use super::Worker;

impl Worker {
    /// Run the full finalization flow, returning the completed row
    pub(crate) async fn finalize(&self, job: &JobRow, status: &DaemonStatus) -> Result<JobRow> {
        let produced = select_produced_file(status)?;
        self.guard_output_path(&produced)?;

        let size = tokio::fs::metadata(&produced)
            .await
            .map_err(|e| {
                Error::Finalize(FinalizeError::MoveFailed {
                    source_path: produced.clone(),
                    dest_path: PathBuf::new(),
                    reason: format!("cannot stat produced file: {e}"),
                })
            })?
            .len();
        if size == 0 {
            return Err(Error::Finalize(FinalizeError::EmptyFile { path: produced }));
        }

        let extension = produced
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        let metadata: Option<serde_json::Value> = job
            .metadata
            .as_deref()
            .and_then(|m| serde_json::from_str(m).ok());

        let dest = library::destination_for(
            &self.config.paths.library,
            job.category(),
            &job.title,
            metadata.as_ref(),
            &extension,
        );

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Finalize(FinalizeError::TargetUnwritable {
                    path: parent.to_path_buf(),
                    reason: e.to_string(),
                })
            })?;
        }

        move_into_library(&produced, &dest, size).await?;

        // Refresh failures are audited, never fatal: the file is in place
        if self.media.is_configured()
            && let Err(e) = self.media.refresh_library().await
        {
            tracing::warn!(job_id = job.id.get(), error = %e, "media server refresh failed");
            let payload = serde_json::json!({"error": e.to_string()});
            if let Err(audit_err) = self
                .db
                .insert_audit(
                    "worker",
                    "media.refresh_failed",
                    "job",
                    Some(&job.id.to_string()),
                    Some(&payload),
                )
                .await
            {
                tracing::error!(error = %audit_err, "failed to audit refresh failure");
            }
        }

        match self
            .db
            .mark_completed(job.id, &dest.to_string_lossy(), size)
            .await?
        {
            Some(row) => Ok(row),
            None => Err(Error::Job(crate::error::JobError::TransitionConflict {
                id: job.id.get(),
                expected: "downloading".into(),
                found: "other".into(),
            })),
        }
    }

    /// Reject outputs that point outside the downloads root
    fn guard_output_path(&self, path: &Path) -> Result<()> {
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(Error::Finalize(FinalizeError::SuspiciousPath {
                path: path.to_path_buf(),
                reason: "parent-directory component".into(),
            }));
        }

        let downloads = &self.config.paths.downloads;
        if path.is_absolute() && downloads.is_absolute() && !path.starts_with(downloads) {
            return Err(Error::Finalize(FinalizeError::SuspiciousPath {
                path: path.to_path_buf(),
                reason: format!("outside downloads root {}", downloads.display()),
            }));
        }

        Ok(())
    }
}

/// The daemon may report several files (fragments, metadata sidecars); the
/// largest regular one is the payload.
fn select_produced_file(status: &DaemonStatus) -> Result<PathBuf> {
    status
        .files
        .iter()
        .filter(|f| !f.path.as_os_str().is_empty())
        .max_by_key(|f| f.length)
        .map(|f| f.path.clone())
        .ok_or_else(|| Error::Finalize(FinalizeError::NoFiles))
}

/// Rename when possible, copy + verify + unlink across filesystems
async fn move_into_library(source: &Path, dest: &Path, expected_size: u64) -> Result<()> {
    match tokio::fs::rename(source, dest).await {
        Ok(()) => return Ok(()),
        Err(e) => {
            tracing::debug!(
                source = %source.display(),
                dest = %dest.display(),
                error = %e,
                "rename failed, falling back to copy"
            );
        }
    }

    let copied = tokio::fs::copy(source, dest).await.map_err(|e| {
        Error::Finalize(FinalizeError::MoveFailed {
            source_path: source.to_path_buf(),
            dest_path: dest.to_path_buf(),
            reason: e.to_string(),
        })
    })?;

    if copied != expected_size {
        let _ = tokio::fs::remove_file(dest).await;
        return Err(Error::Finalize(FinalizeError::SizeMismatch {
            expected: expected_size,
            actual: copied,
        }));
    }

    tokio::fs::remove_file(source).await.map_err(|e| {
        Error::Finalize(FinalizeError::MoveFailed {
            source_path: source.to_path_buf(),
            dest_path: dest.to_path_buf(),
            reason: format!("copied but could not unlink source: {e}"),
        })
    })?;

    Ok(())
}
