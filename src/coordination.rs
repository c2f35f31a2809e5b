//! Provider coordination: the pause table, transient-error backoff, and the
//! provider status cache.
//!
//! The pause and backoff maps live in process memory behind read-mostly
//! locks (reads every scheduler tick, writes rarely) and write through to
//! the store so they survive restarts. Scheduling consults
//! [`Coordination::paused_keys`] and [`Coordination::backed_off_keys`];
//! admins and the UI read the merged [`Coordination::active`] view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::providers::ProviderStatus;

/// An admin-initiated provider pause
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PauseEntry {
    /// Who paused the provider
    pub paused_by: String,
    /// Optional operator note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// When the pause was set
    pub paused_at: DateTime<Utc>,
}

/// A transient-error backoff window
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct BackoffEntry {
    /// Classified failure reason
    pub reason: String,
    /// Current window length in seconds (doubles on repeated hits)
    pub window_secs: u64,
    /// When the current window started
    pub started_at: DateTime<Utc>,
    /// When the window expires
    pub expires_at: DateTime<Utc>,
}

impl BackoffEntry {
    /// Whether the window has passed at the given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Merged pause + backoff view of one provider, for UI display
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CoordinationEntry {
    /// Provider key
    pub provider: String,
    /// Active pause, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause: Option<PauseEntry>,
    /// Unexpired backoff, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffEntry>,
}

struct CachedStatus {
    status: ProviderStatus,
    fetched_at: Instant,
}

/// Provider-fleet coordination state
pub struct Coordination {
    db: Arc<Database>,
    config: Arc<Config>,
    pauses: RwLock<HashMap<String, PauseEntry>>,
    backoffs: RwLock<HashMap<String, BackoffEntry>>,
    statuses: RwLock<HashMap<String, CachedStatus>>,
}

impl Coordination {
    /// Hydrate the maps from the store
    pub async fn load(db: Arc<Database>, config: Arc<Config>) -> Result<Self> {
        let mut pauses = HashMap::new();
        for row in db.list_provider_pauses().await? {
            pauses.insert(
                row.provider_key.clone(),
                PauseEntry {
                    paused_by: row.paused_by,
                    note: row.note,
                    paused_at: crate::db::ts_to_datetime(row.paused_at),
                },
            );
        }

        let mut backoffs = HashMap::new();
        for row in db.list_provider_backoffs().await? {
            backoffs.insert(
                row.provider_key.clone(),
                BackoffEntry {
                    reason: row.reason,
                    window_secs: row.window_secs.max(0) as u64,
                    started_at: crate::db::ts_to_datetime(row.started_at),
                    expires_at: crate::db::ts_to_datetime(row.expires_at),
                },
            );
        }

        Ok(Self {
            db,
            config,
            pauses: RwLock::new(pauses),
            backoffs: RwLock::new(backoffs),
            statuses: RwLock::new(HashMap::new()),
        })
    }

    // --- pause table ---

    /// Pause a provider. Scheduling for it stops within one tick; running
    /// jobs are paused by the worker.
    pub async fn pause(
        &self,
        provider_key: &str,
        paused_by: &str,
        note: Option<&str>,
    ) -> Result<PauseEntry> {
        let row = self
            .db
            .upsert_provider_pause(provider_key, paused_by, note)
            .await?;
        let entry = PauseEntry {
            paused_by: row.paused_by,
            note: row.note,
            paused_at: crate::db::ts_to_datetime(row.paused_at),
        };
        self.pauses
            .write()
            .await
            .insert(provider_key.to_string(), entry.clone());

        tracing::info!(provider = provider_key, by = paused_by, "provider paused");
        Ok(entry)
    }

    /// Clear a provider pause; true when one existed
    pub async fn resume(&self, provider_key: &str) -> Result<bool> {
        let existed = self.db.clear_provider_pause(provider_key).await?;
        self.pauses.write().await.remove(provider_key);
        if existed {
            tracing::info!(provider = provider_key, "provider resumed");
        }
        Ok(existed)
    }

    /// Active pause for a provider
    pub async fn find_pause(&self, provider_key: &str) -> Option<PauseEntry> {
        self.pauses.read().await.get(provider_key).cloned()
    }

    /// Keys of all paused providers
    pub async fn paused_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.pauses.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    // --- backoff table ---

    /// Record a classified transient failure for a provider.
    ///
    /// A first failure opens a window of the provider's configured base (or
    /// the provider-supplied retry-after, when larger); repeated failures
    /// inside an unexpired window double it, capped at the configured
    /// maximum.
    pub async fn note_transient_failure(
        &self,
        provider_key: &str,
        reason: &str,
        retry_after_seconds: Option<u64>,
    ) -> Result<BackoffEntry> {
        let settings = self.config.provider_settings(provider_key);
        let base = retry_after_seconds
            .unwrap_or(settings.error_backoff_seconds)
            .max(settings.error_backoff_seconds);
        let cap = settings.error_backoff_cap_seconds;
        let now = Utc::now();

        let window_secs = {
            let backoffs = self.backoffs.read().await;
            match backoffs.get(provider_key) {
                Some(existing) if !existing.is_expired_at(now) => {
                    (existing.window_secs.saturating_mul(2)).min(cap)
                }
                _ => base.min(cap),
            }
        };

        let entry = BackoffEntry {
            reason: reason.to_string(),
            window_secs,
            started_at: now,
            expires_at: now + chrono::Duration::seconds(window_secs as i64),
        };

        self.db
            .upsert_provider_backoff(
                provider_key,
                reason,
                window_secs as i64,
                entry.started_at.timestamp(),
                entry.expires_at.timestamp(),
            )
            .await?;
        self.backoffs
            .write()
            .await
            .insert(provider_key.to_string(), entry.clone());

        tracing::warn!(
            provider = provider_key,
            reason,
            window_secs,
            "provider backoff installed"
        );
        Ok(entry)
    }

    /// Drop the backoff after the first subsequent success
    pub async fn clear_backoff_on_success(&self, provider_key: &str) -> Result<()> {
        let had_entry = self.backoffs.write().await.remove(provider_key).is_some();
        if had_entry {
            self.db.clear_provider_backoff(provider_key).await?;
            tracing::info!(provider = provider_key, "provider backoff cleared");
        }
        Ok(())
    }

    /// Unexpired backoff for a provider
    pub async fn find_backoff(&self, provider_key: &str) -> Option<BackoffEntry> {
        let entry = self.backoffs.read().await.get(provider_key).cloned()?;
        if entry.is_expired_at(Utc::now()) {
            None
        } else {
            Some(entry)
        }
    }

    /// Keys of providers with an unexpired backoff window
    pub async fn backed_off_keys(&self) -> Vec<String> {
        self.backed_off_keys_at(Utc::now()).await
    }

    pub(crate) async fn backed_off_keys_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut keys: Vec<_> = self
            .backoffs
            .read()
            .await
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Merged pause + unexpired backoff view for UI display
    pub async fn active(&self) -> Vec<CoordinationEntry> {
        let now = Utc::now();
        let pauses = self.pauses.read().await;
        let backoffs = self.backoffs.read().await;

        let mut keys: Vec<&String> = pauses
            .keys()
            .chain(
                backoffs
                    .iter()
                    .filter(|(_, e)| !e.is_expired_at(now))
                    .map(|(k, _)| k),
            )
            .collect();
        keys.sort();
        keys.dedup();

        keys.into_iter()
            .map(|key| CoordinationEntry {
                provider: key.clone(),
                pause: pauses.get(key).cloned(),
                backoff: backoffs
                    .get(key)
                    .filter(|e| !e.is_expired_at(now))
                    .cloned(),
            })
            .collect()
    }

    // --- provider status cache ---

    /// Cached status for a provider, if fresher than `ttl`
    pub async fn cached_status(&self, provider_key: &str, ttl: Duration) -> Option<ProviderStatus> {
        let statuses = self.statuses.read().await;
        let cached = statuses.get(provider_key)?;
        if cached.fetched_at.elapsed() < ttl {
            Some(cached.status.clone())
        } else {
            None
        }
    }

    /// Store a freshly fetched status
    pub async fn store_status(&self, provider_key: &str, status: ProviderStatus) {
        self.statuses.write().await.insert(
            provider_key.to_string(),
            CachedStatus {
                status,
                fetched_at: Instant::now(),
            },
        );
    }
}
