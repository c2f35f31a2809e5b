//! Provider pause and backoff rows.
//!
//! These tables back the in-memory coordination maps; the maps are the
//! read path, the rows make pauses and backoff windows survive restarts.

use crate::error::Result;

use super::{Database, ProviderBackoffRow, ProviderPauseRow, map_db_err};

impl Database {
    /// Upsert a provider pause
    pub async fn upsert_provider_pause(
        &self,
        provider_key: &str,
        paused_by: &str,
        note: Option<&str>,
    ) -> Result<ProviderPauseRow> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO provider_pause (provider_key, paused_by, note, paused_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(provider_key) DO UPDATE SET
                paused_by = excluded.paused_by,
                note = excluded.note,
                paused_at = excluded.paused_at
            "#,
        )
        .bind(provider_key)
        .bind(paused_by)
        .bind(note)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to upsert provider pause", e))?;

        Ok(ProviderPauseRow {
            provider_key: provider_key.to_string(),
            paused_by: paused_by.to_string(),
            note: note.map(str::to_string),
            paused_at: now,
        })
    }

    /// Remove a provider pause; true when a row existed
    pub async fn clear_provider_pause(&self, provider_key: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM provider_pause WHERE provider_key = ?")
            .bind(provider_key)
            .execute(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to clear provider pause", e))?;

        Ok(deleted.rows_affected() > 0)
    }

    /// All provider pauses
    pub async fn list_provider_pauses(&self) -> Result<Vec<ProviderPauseRow>> {
        sqlx::query_as::<_, ProviderPauseRow>(
            "SELECT provider_key, paused_by, note, paused_at FROM provider_pause ORDER BY provider_key",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to list provider pauses", e))
    }

    /// Upsert a provider backoff window
    pub async fn upsert_provider_backoff(
        &self,
        provider_key: &str,
        reason: &str,
        window_secs: i64,
        started_at: i64,
        expires_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_backoff (provider_key, reason, window_secs, started_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(provider_key) DO UPDATE SET
                reason = excluded.reason,
                window_secs = excluded.window_secs,
                started_at = excluded.started_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(provider_key)
        .bind(reason)
        .bind(window_secs)
        .bind(started_at)
        .bind(expires_at)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to upsert provider backoff", e))?;

        Ok(())
    }

    /// Remove a provider backoff; true when a row existed
    pub async fn clear_provider_backoff(&self, provider_key: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM provider_backoff WHERE provider_key = ?")
            .bind(provider_key)
            .execute(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to clear provider backoff", e))?;

        Ok(deleted.rows_affected() > 0)
    }

    /// All provider backoff rows, including expired ones
    pub async fn list_provider_backoffs(&self) -> Result<Vec<ProviderBackoffRow>> {
        sqlx::query_as::<_, ProviderBackoffRow>(
            r#"
            SELECT provider_key, reason, window_secs, started_at, expires_at
            FROM provider_backoff ORDER BY provider_key
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to list provider backoffs", e))
    }
}
