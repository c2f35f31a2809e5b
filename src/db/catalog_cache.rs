//! TTL rows backing the catalog cache.

use crate::error::Result;

use super::{Database, CatalogCacheRow, map_db_err};

impl Database {
    /// Look up a cache entry; returns stale entries too, the caller decides
    pub async fn get_catalog_cache(
        &self,
        provider_key: &str,
        kind: &str,
        cache_key: &str,
    ) -> Result<Option<CatalogCacheRow>> {
        sqlx::query_as::<_, CatalogCacheRow>(
            r#"
            SELECT provider_key, kind, cache_key, payload, fetched_at, ttl_seconds
            FROM catalog_cache WHERE provider_key = ? AND kind = ? AND cache_key = ?
            "#,
        )
        .bind(provider_key)
        .bind(kind)
        .bind(cache_key)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to read catalog cache", e))
    }

    /// Upsert a cache entry with a fresh fetch timestamp
    pub async fn put_catalog_cache(
        &self,
        provider_key: &str,
        kind: &str,
        cache_key: &str,
        payload: &str,
        ttl_seconds: i64,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO catalog_cache (provider_key, kind, cache_key, payload, fetched_at, ttl_seconds)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider_key, kind, cache_key) DO UPDATE SET
                payload = excluded.payload,
                fetched_at = excluded.fetched_at,
                ttl_seconds = excluded.ttl_seconds
            "#,
        )
        .bind(provider_key)
        .bind(kind)
        .bind(cache_key)
        .bind(payload)
        .bind(now)
        .bind(ttl_seconds)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to write catalog cache", e))?;

        Ok(())
    }
}
