//! Job queue CRUD, the atomic claim, and CAS status transitions.
//!
//! Every multi-statement operation runs on one acquired connection under
//! `BEGIN IMMEDIATE` so concurrent writers serialize up front instead of
//! failing at commit time. Status transitions are compare-and-set: the
//! UPDATE carries the expected source status, and zero affected rows means
//! a concurrent writer won the race (`Ok(None)`).

use sqlx::SqliteConnection;

use crate::error::{DatabaseError, Error, Result};
use crate::types::{JobId, JobStatus, PauseSource, QueueStats};
use crate::utils::title_tokens;

use super::{Database, JobRow, NewJob, map_db_err};

/// Shared select list for job rows
const JOB_COLUMNS: &str = "id, user_id, provider_id, provider_key, external_id, title, category, \
     metadata, priority, position, status, progress, speed_bps, eta_seconds, \
     downloader_handle, source_url, tmp_path, final_path, file_size_bytes, \
     error_text, pause_source, created_at, updated_at, deleted_at";

/// Normalize a metadata tree before persisting it.
///
/// Empty strings, nulls, and empty arrays/objects are dropped recursively;
/// a tree that normalizes to nothing becomes `None`.
pub fn normalize_metadata(value: &serde_json::Value) -> Option<serde_json::Value> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::Array(items) => {
            let cleaned: Vec<serde_json::Value> =
                items.iter().filter_map(normalize_metadata).collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(serde_json::Value::Array(cleaned))
            }
        }
        serde_json::Value::Object(map) => {
            let cleaned: serde_json::Map<String, serde_json::Value> = map
                .iter()
                .filter_map(|(k, v)| normalize_metadata(v).map(|v| (k.clone(), v)))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(serde_json::Value::Object(cleaned))
            }
        }
        other => Some(other.clone()),
    }
}

impl Database {
    /// Insert a batch of jobs atomically.
    ///
    /// Either every item is inserted or none. Each provider id is checked
    /// to exist and be enabled inside the same transaction; `position` is
    /// filled as max(position)+1 over the non-terminal set, in batch order.
    pub async fn insert_jobs(&self, batch: &[NewJob]) -> Result<Vec<JobId>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.acquire().await?;
        begin_immediate(&mut *conn).await?;

        let result = async {
            let now = chrono::Utc::now().timestamp();

            let base_position: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(position), 0) FROM jobs WHERE status < 4",
            )
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| map_db_err("Failed to read max position", e))?;

            let mut ids = Vec::with_capacity(batch.len());

            for (offset, job) in batch.iter().enumerate() {
                let enabled: Option<i64> =
                    sqlx::query_scalar("SELECT enabled FROM providers WHERE id = ?")
                        .bind(job.provider_id)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| map_db_err("Failed to check provider", e))?;

                match enabled {
                    Some(e) if e != 0 => {}
                    Some(_) => {
                        return Err(Error::Validation(format!(
                            "provider {} is disabled",
                            job.provider_key
                        )));
                    }
                    None => {
                        return Err(Error::Validation(format!(
                            "unknown provider key: {}",
                            job.provider_key
                        )));
                    }
                }

                let metadata_json = job
                    .metadata
                    .as_ref()
                    .and_then(normalize_metadata)
                    .map(|v| v.to_string());

                let insert = sqlx::query(
                    r#"
                    INSERT INTO jobs (
                        user_id, provider_id, provider_key, external_id, title,
                        category, metadata, priority, position, status,
                        progress, speed_bps, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0.0, 0, ?, ?)
                    "#,
                )
                .bind(job.user_id)
                .bind(job.provider_id)
                .bind(&job.provider_key)
                .bind(&job.external_id)
                .bind(&job.title)
                .bind(job.category.as_str())
                .bind(metadata_json)
                .bind(job.priority)
                .bind(base_position + offset as i64 + 1)
                .bind(JobStatus::Queued.rank())
                .bind(now)
                .bind(now)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_db_err("Failed to insert job", e))?;

                ids.push(JobId(insert.last_insert_rowid()));
            }

            Ok::<Vec<JobId>, Error>(ids)
        }
        .await;

        finish_tx(&mut *conn, result).await
    }

    /// Atomically claim up to `limit` runnable jobs, transitioning them
    /// `queued → starting`.
    ///
    /// Jobs bound to an excluded provider (paused or backed off) are
    /// skipped. The claim order is the canonical admission key: priority,
    /// then position, then age, then id. Rows lost to a concurrent claimer
    /// between select and update are silently dropped from the batch.
    pub async fn claim_next_runnable(
        &self,
        limit: usize,
        excluded_keys: &[String],
    ) -> Result<Vec<JobRow>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.acquire().await?;
        begin_immediate(&mut *conn).await?;

        let result = async {
            let placeholders = vec!["?"; excluded_keys.len()].join(", ");
            let select = if excluded_keys.is_empty() {
                format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 3 \
                     ORDER BY priority ASC, position ASC, created_at ASC, id ASC LIMIT ?"
                )
            } else {
                format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 3 \
                     AND provider_key NOT IN ({placeholders}) \
                     ORDER BY priority ASC, position ASC, created_at ASC, id ASC LIMIT ?"
                )
            };

            let mut query = sqlx::query_as::<_, JobRow>(&select);
            for key in excluded_keys {
                query = query.bind(key);
            }
            let candidates = query
                .bind(limit as i64)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| map_db_err("Failed to select runnable jobs", e))?;

            let now = chrono::Utc::now().timestamp();
            let mut claimed = Vec::with_capacity(candidates.len());

            for mut job in candidates {
                // Row-level guard: a concurrent claimer loses exactly one of
                // these updates, never both.
                let updated = sqlx::query(
                    "UPDATE jobs SET status = 1, updated_at = ? WHERE id = ? AND status = 3",
                )
                .bind(now)
                .bind(job.id)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_db_err("Failed to claim job", e))?;

                if updated.rows_affected() == 1 {
                    job.status = JobStatus::Starting.rank();
                    job.updated_at = now;
                    claimed.push(job);
                }
            }

            Ok::<Vec<JobRow>, Error>(claimed)
        }
        .await;

        finish_tx(&mut *conn, result).await
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: JobId) -> Result<Option<JobRow>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to get job", e))
    }

    /// Jobs in active states (downloading, starting, paused)
    pub async fn active_jobs(&self) -> Result<Vec<JobRow>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status IN (0, 1, 2) ORDER BY id ASC"
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to list active jobs", e))
    }

    /// Number of jobs counting against the admission cap
    /// (status `downloading` or `starting`)
    pub async fn count_admitted(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status IN (0, 1)")
            .fetch_one(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to count admitted jobs", e))
    }

    /// Jobs holding a daemon handle
    pub async fn jobs_with_handles(&self) -> Result<Vec<JobRow>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE downloader_handle IS NOT NULL ORDER BY id ASC"
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to list jobs with handles", e))
    }

    /// Downloading jobs whose daemon handle is missing (state lost)
    pub async fn downloading_without_handle(&self) -> Result<Vec<JobRow>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 0 AND downloader_handle IS NULL"
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to list handleless jobs", e))
    }

    /// Jobs for one provider in a given status
    pub async fn jobs_for_provider_in_status(
        &self,
        provider_key: &str,
        status: JobStatus,
    ) -> Result<Vec<JobRow>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE provider_key = ? AND status = ? ORDER BY id ASC"
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(provider_key)
            .bind(status.rank())
            .fetch_all(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to list provider jobs", e))
    }

    /// Update live transfer metrics, idempotent on `(id, handle)`.
    ///
    /// The handle guard keeps a late poll for a re-used id from touching a
    /// row that has moved on; the status guard keeps terminal rows frozen.
    /// Progress on this path is capped strictly below 100: the 100.0 write
    /// belongs to `mark_completed`, so `progress = 100` always means a
    /// terminal row.
    pub async fn update_progress(
        &self,
        id: JobId,
        handle: &str,
        progress: f32,
        speed_bps: u64,
        eta_seconds: Option<u64>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let updated = sqlx::query(
            r#"
            UPDATE jobs SET progress = ?, speed_bps = ?, eta_seconds = ?, updated_at = ?
            WHERE id = ? AND downloader_handle = ? AND status = 0
            "#,
        )
        .bind(progress.clamp(0.0, 99.9))
        .bind(speed_bps as i64)
        .bind(eta_seconds.map(|v| v as i64))
        .bind(now)
        .bind(id)
        .bind(handle)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to update progress", e))?;

        Ok(updated.rows_affected() == 1)
    }

    /// CAS `starting → downloading`, binding the daemon handle
    pub async fn mark_downloading(
        &self,
        id: JobId,
        handle: &str,
        source_url: &str,
        tmp_path: &str,
    ) -> Result<Option<JobRow>> {
        let now = chrono::Utc::now().timestamp();
        let updated = sqlx::query(
            r#"
            UPDATE jobs SET status = 0, downloader_handle = ?, source_url = ?,
                tmp_path = ?, error_text = NULL, updated_at = ?
            WHERE id = ? AND status = 1
            "#,
        )
        .bind(handle)
        .bind(source_url)
        .bind(tmp_path)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to mark downloading", e))?;

        self.row_if_updated(id, updated.rows_affected()).await
    }

    /// CAS back to `queued` from any of `from`, releasing the handle.
    ///
    /// Used for transient failures and for claims invalidated by a provider
    /// pause; the optional error text surfaces the retry reason to the user.
    pub async fn requeue(
        &self,
        id: JobId,
        from: &[JobStatus],
        error_text: Option<&str>,
    ) -> Result<Option<JobRow>> {
        let guard = status_set(from);
        let now = chrono::Utc::now().timestamp();
        let sql = format!(
            "UPDATE jobs SET status = 3, downloader_handle = NULL, progress = 0.0, \
             speed_bps = 0, eta_seconds = NULL, pause_source = NULL, error_text = ?, \
             updated_at = ? WHERE id = ? AND status IN ({guard})"
        );
        let updated = sqlx::query(&sql)
            .bind(error_text)
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to requeue job", e))?;

        self.row_if_updated(id, updated.rows_affected()).await
    }

    /// CAS to `failed` from any of `from`, releasing the handle
    pub async fn mark_failed(
        &self,
        id: JobId,
        from: &[JobStatus],
        error_text: &str,
    ) -> Result<Option<JobRow>> {
        let guard = status_set(from);
        let now = chrono::Utc::now().timestamp();
        let sql = format!(
            "UPDATE jobs SET status = 5, downloader_handle = NULL, speed_bps = 0, \
             eta_seconds = NULL, pause_source = NULL, error_text = ?, updated_at = ? \
             WHERE id = ? AND status IN ({guard})"
        );
        let updated = sqlx::query(&sql)
            .bind(error_text)
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to mark job failed", e))?;

        self.row_if_updated(id, updated.rows_affected()).await
    }

    /// CAS `downloading → paused`, keeping the handle so the transfer can resume
    pub async fn mark_paused(&self, id: JobId, source: PauseSource) -> Result<Option<JobRow>> {
        let now = chrono::Utc::now().timestamp();
        let updated = sqlx::query(
            r#"
            UPDATE jobs SET status = 2, speed_bps = 0, eta_seconds = NULL,
                pause_source = ?, updated_at = ?
            WHERE id = ? AND status = 0
            "#,
        )
        .bind(source.as_str())
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to mark job paused", e))?;

        self.row_if_updated(id, updated.rows_affected()).await
    }

    /// CAS `paused → downloading` for a job whose handle is still live
    pub async fn mark_resumed(&self, id: JobId) -> Result<Option<JobRow>> {
        let now = chrono::Utc::now().timestamp();
        let updated = sqlx::query(
            r#"
            UPDATE jobs SET status = 0, pause_source = NULL, updated_at = ?
            WHERE id = ? AND status = 2 AND downloader_handle IS NOT NULL
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to mark job resumed", e))?;

        self.row_if_updated(id, updated.rows_affected()).await
    }

    /// CAS `downloading → completed` after finalization succeeded
    pub async fn mark_completed(
        &self,
        id: JobId,
        final_path: &str,
        file_size_bytes: u64,
    ) -> Result<Option<JobRow>> {
        let now = chrono::Utc::now().timestamp();
        let updated = sqlx::query(
            r#"
            UPDATE jobs SET status = 4, progress = 100.0, speed_bps = 0,
                eta_seconds = NULL, downloader_handle = NULL, pause_source = NULL,
                final_path = ?, file_size_bytes = ?, error_text = NULL, updated_at = ?
            WHERE id = ? AND status = 0
            "#,
        )
        .bind(final_path)
        .bind(file_size_bytes as i64)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to mark job completed", e))?;

        self.row_if_updated(id, updated.rows_affected()).await
    }

    /// CAS any non-terminal status to `canceled`, releasing the handle
    pub async fn mark_canceled(&self, id: JobId) -> Result<Option<JobRow>> {
        let now = chrono::Utc::now().timestamp();
        let updated = sqlx::query(
            r#"
            UPDATE jobs SET status = 6, downloader_handle = NULL, speed_bps = 0,
                eta_seconds = NULL, pause_source = NULL, updated_at = ?
            WHERE id = ? AND status < 4
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to mark job canceled", e))?;

        self.row_if_updated(id, updated.rows_affected()).await
    }

    /// CAS `completed → deleted`, clearing the library path
    pub async fn mark_deleted(&self, id: JobId) -> Result<Option<JobRow>> {
        let now = chrono::Utc::now().timestamp();
        let updated = sqlx::query(
            r#"
            UPDATE jobs SET status = 7, final_path = NULL, deleted_at = ?, updated_at = ?
            WHERE id = ? AND status = 4
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to mark job deleted", e))?;

        self.row_if_updated(id, updated.rows_affected()).await
    }

    /// Change the priority of a queued job
    pub async fn set_priority(&self, id: JobId, priority: i32) -> Result<Option<JobRow>> {
        let now = chrono::Utc::now().timestamp();
        let updated = sqlx::query(
            "UPDATE jobs SET priority = ?, updated_at = ? WHERE id = ? AND status = 3",
        )
        .bind(priority)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to set priority", e))?;

        self.row_if_updated(id, updated.rows_affected()).await
    }

    /// Rewrite positions for the given ids, contiguous from 1, in request
    /// order. Ids that are no longer `queued` are skipped; unrelated jobs
    /// keep their positions. Returns the number of rewritten rows.
    pub async fn reorder(&self, ids: &[JobId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.acquire().await?;
        begin_immediate(&mut *conn).await?;

        let result = async {
            let now = chrono::Utc::now().timestamp();
            let mut applied = 0usize;

            for id in ids {
                let updated = sqlx::query(
                    "UPDATE jobs SET position = ?, updated_at = ? WHERE id = ? AND status = 3",
                )
                .bind((applied + 1) as i64)
                .bind(now)
                .bind(*id)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_db_err("Failed to reorder job", e))?;

                if updated.rows_affected() == 1 {
                    applied += 1;
                }
            }

            Ok::<usize, Error>(applied)
        }
        .await;

        finish_tx(&mut *conn, result).await
    }

    /// Paged job listing.
    ///
    /// Ordering: active states before queued before terminal (the rank
    /// encoding), then priority, position, and recency within a band.
    /// `user_filter` restricts to one owner (non-admin callers, `mine=1`).
    pub async fn list_paged(
        &self,
        user_filter: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<JobRow>, i64)> {
        let (rows, total) = match user_filter {
            Some(user_id) => {
                let sql = format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE user_id = ? \
                     ORDER BY status ASC, priority ASC, position ASC, created_at DESC, id DESC \
                     LIMIT ? OFFSET ?"
                );
                let rows = sqlx::query_as::<_, JobRow>(&sql)
                    .bind(user_id)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.pool())
                    .await
                    .map_err(|e| map_db_err("Failed to list jobs", e))?;
                let total: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE user_id = ?")
                        .bind(user_id)
                        .fetch_one(self.pool())
                        .await
                        .map_err(|e| map_db_err("Failed to count jobs", e))?;
                (rows, total)
            }
            None => {
                let sql = format!(
                    "SELECT {JOB_COLUMNS} FROM jobs \
                     ORDER BY status ASC, priority ASC, position ASC, created_at DESC, id DESC \
                     LIMIT ? OFFSET ?"
                );
                let rows = sqlx::query_as::<_, JobRow>(&sql)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.pool())
                    .await
                    .map_err(|e| map_db_err("Failed to list jobs", e))?;
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
                    .fetch_one(self.pool())
                    .await
                    .map_err(|e| map_db_err("Failed to count jobs", e))?;
                (rows, total)
            }
        };

        Ok((rows, total))
    }

    /// Aggregate queue counters
    pub async fn stats(&self) -> Result<QueueStats> {
        let rows: Vec<(i32, i64, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*), COALESCE(SUM(speed_bps), 0) FROM jobs GROUP BY status",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to aggregate stats", e))?;

        let mut stats = QueueStats {
            total: 0,
            queued: 0,
            starting: 0,
            downloading: 0,
            paused: 0,
            completed: 0,
            failed: 0,
            canceled: 0,
            deleted: 0,
            total_speed_bps: 0,
        };

        for (status, count, speed) in rows {
            let count = count as usize;
            stats.total += count;
            match JobStatus::from_i32(status) {
                JobStatus::Downloading => {
                    stats.downloading = count;
                    stats.total_speed_bps = speed.max(0) as u64;
                }
                JobStatus::Starting => stats.starting = count,
                JobStatus::Paused => stats.paused = count,
                JobStatus::Queued => stats.queued = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Failed => stats.failed = count,
                JobStatus::Canceled => stats.canceled = count,
                JobStatus::Deleted => stats.deleted = count,
            }
        }

        Ok(stats)
    }

    /// Titles of completed jobs matching every token of the query title,
    /// used to warn about duplicate library entries at queue time.
    pub async fn find_existing_by_title_tokens(&self, title: &str) -> Result<Vec<String>> {
        let tokens = title_tokens(title);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from("SELECT DISTINCT title FROM jobs WHERE status = 4");
        for _ in &tokens {
            sql.push_str(" AND LOWER(title) LIKE ?");
        }
        sql.push_str(" ORDER BY title ASC");

        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for token in &tokens {
            query = query.bind(format!("%{token}%"));
        }

        query
            .fetch_all(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to search existing titles", e))
    }

    /// Requeue jobs stuck in `starting` (crash recovery at startup).
    ///
    /// A `starting` row means a scheduler claimed it but never bound a
    /// handle; after a restart no task owns it anymore.
    pub async fn requeue_stuck_starting(&self) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let updated = sqlx::query(
            "UPDATE jobs SET status = 3, updated_at = ? WHERE status = 1",
        )
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to requeue stuck jobs", e))?;

        Ok(updated.rows_affected())
    }

    /// Fetch the row after a CAS update, or None when the CAS lost
    async fn row_if_updated(&self, id: JobId, rows_affected: u64) -> Result<Option<JobRow>> {
        if rows_affected == 0 {
            return Ok(None);
        }
        self.get_job(id).await
    }

    pub(crate) async fn acquire(
        &self,
    ) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.pool().acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {e}"
            )))
        })
    }
}

/// Render a status guard list for an IN clause
fn status_set(statuses: &[JobStatus]) -> String {
    statuses
        .iter()
        .map(|s| s.rank().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Take the write lock up front so concurrent writers serialize here
/// instead of failing at commit time.
pub(crate) async fn begin_immediate(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(|e| map_db_err("Failed to begin transaction", e))?;
    Ok(())
}

/// Commit on success, roll back on failure, and propagate the inner result
pub(crate) async fn finish_tx<T>(
    conn: &mut SqliteConnection,
    result: std::result::Result<T, Error>,
) -> Result<T> {
    match result {
        Ok(value) => {
            if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
                // The transaction must not leak back into the pool half-open
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(map_db_err("Failed to commit transaction", e));
            }
            Ok(value)
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(e)
        }
    }
}

impl Database {
    /// Merge one key into a job's metadata tree (read-modify-write under
    /// the write lock). Used for resolution byproducts such as alternate
    /// source URLs.
    pub async fn merge_metadata_key(
        &self,
        id: JobId,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<()> {
        let mut conn = self.acquire().await?;
        begin_immediate(&mut *conn).await?;

        let result = async {
            let existing: Option<Option<String>> =
                sqlx::query_scalar("SELECT metadata FROM jobs WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(|e| map_db_err("Failed to read metadata", e))?;

            let Some(existing) = existing else {
                return Err(Error::Database(DatabaseError::NotFound(format!(
                    "job {id}"
                ))));
            };

            let mut tree: serde_json::Value = existing
                .as_deref()
                .and_then(|m| serde_json::from_str(m).ok())
                .unwrap_or_else(|| serde_json::json!({}));
            if let Some(map) = tree.as_object_mut() {
                map.insert(key.to_string(), value.clone());
            }

            sqlx::query("UPDATE jobs SET metadata = ?, updated_at = ? WHERE id = ?")
                .bind(tree.to_string())
                .bind(chrono::Utc::now().timestamp())
                .bind(id)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_db_err("Failed to merge metadata", e))?;

            Ok::<(), Error>(())
        }
        .await;

        finish_tx(&mut *conn, result).await
    }
}
