//! Provider rows and the deletion guard.

use crate::error::{Error, Result};

use super::{Database, ProviderRow, map_db_err};

const PROVIDER_COLUMNS: &str = "id, key, enabled, config_ciphertext, created_at";

impl Database {
    /// Insert a provider row
    pub async fn insert_provider(
        &self,
        key: &str,
        enabled: bool,
        config_ciphertext: Option<&str>,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO providers (key, enabled, config_ciphertext, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(key)
        .bind(enabled as i64)
        .bind(config_ciphertext)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to insert provider", e))?;

        Ok(result.last_insert_rowid())
    }

    /// All provider rows
    pub async fn list_providers(&self) -> Result<Vec<ProviderRow>> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM providers ORDER BY key ASC");
        sqlx::query_as::<_, ProviderRow>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to list providers", e))
    }

    /// Enabled provider rows only
    pub async fn list_enabled_providers(&self) -> Result<Vec<ProviderRow>> {
        let sql =
            format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE enabled = 1 ORDER BY key ASC");
        sqlx::query_as::<_, ProviderRow>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to list enabled providers", e))
    }

    /// Find a provider by its key
    pub async fn find_provider_by_key(&self, key: &str) -> Result<Option<ProviderRow>> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE key = ?");
        sqlx::query_as::<_, ProviderRow>(&sql)
            .bind(key)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to find provider", e))
    }

    /// Get a provider by id
    pub async fn get_provider(&self, id: i64) -> Result<Option<ProviderRow>> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE id = ?");
        sqlx::query_as::<_, ProviderRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to get provider", e))
    }

    /// Disable a provider at runtime (credential decryption failure)
    pub async fn disable_provider(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE providers SET enabled = 0 WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to disable provider", e))?;
        Ok(())
    }

    /// Delete a provider, refusing while any non-terminal job references it
    pub async fn delete_provider(&self, id: i64) -> Result<()> {
        let live: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE provider_id = ? AND status < 4",
        )
        .bind(id)
        .fetch_one(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to count provider jobs", e))?;

        if live > 0 {
            return Err(Error::Validation(format!(
                "provider {id} still has {live} non-terminal jobs"
            )));
        }

        sqlx::query("DELETE FROM providers WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| map_db_err("Failed to delete provider", e))?;

        Ok(())
    }
}
