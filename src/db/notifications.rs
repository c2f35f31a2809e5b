//! Per-user notifications written on terminal job transitions.
//!
//! SSE is the live channel; these rows are the catch-up channel for clients
//! that were not connected when a job finished.

use crate::error::Result;

use super::{Database, NotificationRow, map_db_err};

impl Database {
    /// Append a notification for a user
    pub async fn insert_notification(
        &self,
        user_id: i64,
        kind: &str,
        payload: Option<&str>,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO notifications (user_id, kind, payload, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(kind)
        .bind(payload)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to insert notification", e))?;

        Ok(result.last_insert_rowid())
    }

    /// Recent notifications for a user, newest first
    pub async fn recent_notifications(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<NotificationRow>> {
        sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, user_id, kind, payload, created_at FROM notifications
            WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to list notifications", e))
    }
}
