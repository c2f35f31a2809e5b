//! Bulk resolution task lifecycle.

use crate::error::{Error, Result};
use crate::types::BulkTaskStatus;

use super::{Database, BulkTaskRow, map_db_err};

const BULK_COLUMNS: &str = "id, user_id, payload, options, status, total_items, \
     processed_items, failed_items, error_text, created_at, updated_at";

impl Database {
    /// Insert a new bulk task in `pending`
    pub async fn insert_bulk_task(
        &self,
        user_id: i64,
        payload: &str,
        options: Option<&str>,
        total_items: u32,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO bulk_tasks (
                user_id, payload, options, status, total_items,
                processed_items, failed_items, created_at, updated_at
            ) VALUES (?, ?, ?, 0, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(payload)
        .bind(options)
        .bind(total_items as i64)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to insert bulk task", e))?;

        Ok(result.last_insert_rowid())
    }

    /// Get a bulk task by ID
    pub async fn get_bulk_task(&self, id: i64) -> Result<Option<BulkTaskRow>> {
        let sql = format!("SELECT {BULK_COLUMNS} FROM bulk_tasks WHERE id = ?");
        sqlx::query_as::<_, BulkTaskRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to get bulk task", e))
    }

    /// Atomically claim the oldest pending task, transitioning it
    /// `pending → processing`. Returns None when the queue is empty.
    pub async fn claim_pending_bulk_task(&self) -> Result<Option<BulkTaskRow>> {
        let candidate: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM bulk_tasks WHERE status = 0 ORDER BY id ASC LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to select pending bulk task", e))?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        let now = chrono::Utc::now().timestamp();
        // Status guard keeps two resolver loops from both claiming the row
        let updated = sqlx::query(
            "UPDATE bulk_tasks SET status = 1, updated_at = ? WHERE id = ? AND status = 0",
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to claim bulk task", e))?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_bulk_task(id).await
    }

    /// Record per-item progress on a processing task
    pub async fn bump_bulk_progress(
        &self,
        id: i64,
        processed_items: u32,
        failed_items: u32,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE bulk_tasks SET processed_items = ?, failed_items = ?, updated_at = ?
            WHERE id = ? AND status = 1
            "#,
        )
        .bind(processed_items as i64)
        .bind(failed_items as i64)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to update bulk progress", e))?;

        Ok(())
    }

    /// Finish a task as `completed` with its final item accounting
    pub async fn complete_bulk_task(
        &self,
        id: i64,
        processed_items: u32,
        failed_items: u32,
    ) -> Result<()> {
        self.finish_bulk_task(id, BulkTaskStatus::Completed, processed_items, failed_items, None)
            .await
    }

    /// Finish a task as `failed` with the fatal error text
    pub async fn fail_bulk_task(
        &self,
        id: i64,
        processed_items: u32,
        failed_items: u32,
        error_text: &str,
    ) -> Result<()> {
        self.finish_bulk_task(
            id,
            BulkTaskStatus::Failed,
            processed_items,
            failed_items,
            Some(error_text),
        )
        .await
    }

    async fn finish_bulk_task(
        &self,
        id: i64,
        status: BulkTaskStatus,
        processed_items: u32,
        failed_items: u32,
        error_text: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let updated = sqlx::query(
            r#"
            UPDATE bulk_tasks SET status = ?, processed_items = ?, failed_items = ?,
                error_text = ?, updated_at = ?
            WHERE id = ? AND status = 1
            "#,
        )
        .bind(status.to_i32())
        .bind(processed_items as i64)
        .bind(failed_items as i64)
        .bind(error_text)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to finish bulk task", e))?;

        if updated.rows_affected() == 0 {
            return Err(Error::Validation(format!(
                "bulk task {id} is not processing"
            )));
        }

        Ok(())
    }
}

impl Database {
    /// Reset bulk tasks stuck in `processing` back to `pending`
    /// (crash recovery at startup).
    ///
    /// A `processing` row means a resolver loop claimed it but never reached
    /// a terminal state; after a restart no loop owns it anymore. Progress
    /// counters are kept so the resolver resumes at the recorded item.
    pub async fn requeue_stuck_bulk_tasks(&self) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let updated = sqlx::query(
            "UPDATE bulk_tasks SET status = 0, updated_at = ? WHERE status = 1",
        )
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to requeue stuck bulk tasks", e))?;

        Ok(updated.rows_affected())
    }
}
