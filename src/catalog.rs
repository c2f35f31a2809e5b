//! Catalog cache: time-bounded caching of provider menu pages and stream
//! variants.
//!
//! Lookups serve fresh entries from the store, fetch through the provider
//! registry on a miss (or `refresh=true`), and fall back to a stale entry
//! marked `stale` when a refresh hits a transient provider error. Callers
//! decide whether to surface staleness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::providers::{MenuPage, Registry, Variant};

const KIND_MENU: &str = "menu";
const KIND_VARIANTS: &str = "variants";

/// Cache provenance attached to every lookup result
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CacheInfo {
    /// Whether the payload came from the cache
    pub hit: bool,
    /// Age of the payload in seconds (0 for a fresh fetch)
    pub age_seconds: u64,
    /// TTL the entry was stored with
    pub ttl_seconds: u64,
    /// When the payload was fetched from the provider
    pub fetched_at: DateTime<Utc>,
    /// Whether passing `refresh=true` can re-fetch this entry
    pub refreshable: bool,
    /// True when a transient provider error forced serving an expired entry
    pub stale: bool,
}

/// A cache lookup result: the payload plus its provenance
#[derive(Clone, Debug)]
pub struct CacheLookup<T> {
    /// The cached or freshly fetched payload
    pub data: T,
    /// Cache provenance
    pub cache: CacheInfo,
}

/// Normalize a browse path so equivalent spellings share a cache entry:
/// leading slash, collapsed separators, no trailing slash (except root).
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let mut out = String::from("/");
    for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// TTL caches over provider browse results
pub struct CatalogCache {
    db: Arc<Database>,
    registry: Arc<Registry>,
    config: Arc<Config>,
}

impl CatalogCache {
    /// Build the cache over the store and registry
    pub fn new(db: Arc<Database>, registry: Arc<Registry>, config: Arc<Config>) -> Self {
        Self {
            db,
            registry,
            config,
        }
    }

    /// Look up a provider menu page
    pub async fn menu(
        &self,
        provider_key: &str,
        path: &str,
        refresh: bool,
    ) -> Result<CacheLookup<MenuPage>> {
        let handle = self
            .registry
            .get(provider_key)
            .await
            .ok_or_else(|| Error::NotFound(format!("provider {provider_key}")))?;
        let Some(browsable) = handle.browsable() else {
            return Err(Error::Provider(crate::error::ProviderError::Unsupported(
                "menu browsing".into(),
            )));
        };

        let normalized = normalize_path(path);
        let ttl = self.config.provider_settings(provider_key).menu_cache_ttl_seconds;

        self.lookup(provider_key, KIND_MENU, &normalized, ttl, refresh, || async {
            browsable.menu(&normalized).await
        })
        .await
    }

    /// Look up the stream variants of an item
    pub async fn variants(
        &self,
        provider_key: &str,
        external_id: &str,
        refresh: bool,
    ) -> Result<CacheLookup<Vec<Variant>>> {
        let handle = self
            .registry
            .get(provider_key)
            .await
            .ok_or_else(|| Error::NotFound(format!("provider {provider_key}")))?;
        let Some(listable) = handle.variant_listable() else {
            return Err(Error::Provider(crate::error::ProviderError::Unsupported(
                "variant listing".into(),
            )));
        };

        let ttl = self
            .config
            .provider_settings(provider_key)
            .variants_cache_ttl_seconds;

        self.lookup(
            provider_key,
            KIND_VARIANTS,
            external_id,
            ttl,
            refresh,
            || async { listable.variants(external_id).await },
        )
        .await
    }

    /// Shared lookup flow: fresh hit, else fetch, else stale fallback
    async fn lookup<T, F, Fut>(
        &self,
        provider_key: &str,
        kind: &str,
        cache_key: &str,
        ttl_seconds: u64,
        refresh: bool,
        fetch: F,
    ) -> Result<CacheLookup<T>>
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, crate::error::ProviderError>>,
    {
        let existing = self
            .db
            .get_catalog_cache(provider_key, kind, cache_key)
            .await?;
        let now = Utc::now().timestamp();

        if !refresh
            && let Some(row) = &existing
            && row.is_fresh(now)
        {
            let data: T = serde_json::from_str(&row.payload)?;
            return Ok(CacheLookup {
                data,
                cache: CacheInfo {
                    hit: true,
                    age_seconds: row.age_seconds(now) as u64,
                    ttl_seconds: row.ttl_seconds.max(0) as u64,
                    fetched_at: crate::db::ts_to_datetime(row.fetched_at),
                    refreshable: true,
                    stale: false,
                },
            });
        }

        match fetch().await {
            Ok(data) => {
                let payload = serde_json::to_string(&data)?;
                self.db
                    .put_catalog_cache(provider_key, kind, cache_key, &payload, ttl_seconds as i64)
                    .await?;

                Ok(CacheLookup {
                    data,
                    cache: CacheInfo {
                        hit: false,
                        age_seconds: 0,
                        ttl_seconds,
                        fetched_at: Utc::now(),
                        refreshable: true,
                        stale: false,
                    },
                })
            }
            Err(e) if e.is_transient() => {
                // Serve what we have rather than failing the browse
                if let Some(row) = existing {
                    tracing::warn!(
                        provider = provider_key,
                        kind,
                        error = %e,
                        "refresh failed, serving stale catalog entry"
                    );
                    let data: T = serde_json::from_str(&row.payload)?;
                    return Ok(CacheLookup {
                        data,
                        cache: CacheInfo {
                            hit: true,
                            age_seconds: row.age_seconds(now) as u64,
                            ttl_seconds: row.ttl_seconds.max(0) as u64,
                            fetched_at: crate::db::ts_to_datetime(row.fetched_at),
                            refreshable: true,
                            stale: true,
                        },
                    });
                }
                Err(Error::Provider(e))
            }
            Err(e) => Err(Error::Provider(e)),
        }
    }
}
