//! Database layer for media-dl
//!
//! Handles SQLite persistence for jobs, bulk tasks, provider coordination,
//! users, the audit trail, notifications, and the catalog cache.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`jobs`] — Job queue CRUD, the atomic claim, and CAS status transitions
//! - [`bulk_tasks`] — Bulk resolution task lifecycle
//! - [`coordination`] — Provider pause and backoff rows
//! - [`providers`] — Provider rows and the deletion guard
//! - [`users`] — Session token lookup
//! - [`audit`] — Append-only audit trail
//! - [`notifications`] — Per-user terminal-transition notifications
//! - [`catalog_cache`] — TTL rows backing the catalog cache

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

use crate::error::{DatabaseError, Error};
use crate::types::{
    BulkTaskInfo, BulkTaskStatus, Category, JobId, JobInfo, JobStatus, PauseSource,
};

mod audit;
mod bulk_tasks;
mod catalog_cache;
mod coordination;
mod jobs;
mod migrations;
mod notifications;
mod providers;
mod users;

pub use jobs::normalize_metadata;

/// New job to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Owning user id
    pub user_id: i64,
    /// Provider row id
    pub provider_id: i64,
    /// Provider key (denormalized for claim filtering)
    pub provider_key: String,
    /// Provider-scoped item key
    pub external_id: String,
    /// Display title
    pub title: String,
    /// Library category
    pub category: Category,
    /// Free-form structured hints, normalized before insert
    pub metadata: Option<serde_json::Value>,
    /// Admission priority (lower = earlier)
    pub priority: i32,
}

/// Job record from database
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    /// Unique database ID
    pub id: JobId,
    /// Owning user id
    pub user_id: i64,
    /// Provider row id
    pub provider_id: i64,
    /// Provider key (denormalized for claim filtering)
    pub provider_key: String,
    /// Provider-scoped item key
    pub external_id: String,
    /// Display title
    pub title: String,
    /// Library category name
    pub category: String,
    /// Normalized metadata JSON
    pub metadata: Option<String>,
    /// Admission priority (lower = earlier)
    pub priority: i32,
    /// Tiebreak position within a priority band
    pub position: i64,
    /// Status code (the canonical rank encoding)
    pub status: i32,
    /// Progress percentage (0.0-100.0)
    pub progress: f32,
    /// Current download speed in bytes per second
    pub speed_bps: i64,
    /// Estimated seconds to completion
    pub eta_seconds: Option<i64>,
    /// Opaque daemon handle while the transfer is live
    pub downloader_handle: Option<String>,
    /// Resolved source URL
    pub source_url: Option<String>,
    /// Directory the daemon writes into
    pub tmp_path: Option<String>,
    /// Final library path once completed
    pub final_path: Option<String>,
    /// Size of the completed file in bytes
    pub file_size_bytes: Option<i64>,
    /// Last error message
    pub error_text: Option<String>,
    /// Who paused the job ('user' or 'provider')
    pub pause_source: Option<String>,
    /// Unix timestamp when the job was enqueued
    pub created_at: i64,
    /// Unix timestamp of the last row change
    pub updated_at: i64,
    /// Unix timestamp when the library file was deleted
    pub deleted_at: Option<i64>,
}

impl JobRow {
    /// Decoded lifecycle status
    pub fn status(&self) -> JobStatus {
        JobStatus::from_i32(self.status)
    }

    /// Decoded category, defaulting to Movies for unknown rows
    pub fn category(&self) -> Category {
        self.category.parse().unwrap_or_default()
    }

    /// Decoded pause source
    pub fn pause_source(&self) -> Option<PauseSource> {
        self.pause_source.as_deref().and_then(PauseSource::from_db)
    }

    /// Convert to the API-facing shape
    pub fn to_info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            user_id: self.user_id,
            provider: self.provider_key.clone(),
            external_id: self.external_id.clone(),
            title: self.title.clone(),
            category: self.category(),
            status: self.status(),
            progress: self.progress,
            speed_bps: self.speed_bps.max(0) as u64,
            eta_seconds: self.eta_seconds.map(|v| v.max(0) as u64),
            priority: self.priority,
            position: self.position,
            downloader_handle: self.downloader_handle.clone(),
            final_path: self.final_path.clone(),
            file_size_bytes: self.file_size_bytes.map(|v| v.max(0) as u64),
            error_text: self.error_text.clone(),
            metadata: self
                .metadata
                .as_deref()
                .and_then(|m| serde_json::from_str(m).ok()),
            created_at: ts_to_datetime(self.created_at),
            updated_at: ts_to_datetime(self.updated_at),
            deleted_at: self.deleted_at.map(ts_to_datetime),
        }
    }
}

/// Bulk task record from database
#[derive(Debug, Clone, FromRow)]
pub struct BulkTaskRow {
    /// Unique database ID
    pub id: i64,
    /// Submitting user
    pub user_id: i64,
    /// JSON array of submitted items
    pub payload: String,
    /// JSON options object
    pub options: Option<String>,
    /// Status code
    pub status: i32,
    /// Number of items in the submission
    pub total_items: i64,
    /// Items expanded into jobs
    pub processed_items: i64,
    /// Items that could not be resolved
    pub failed_items: i64,
    /// Fatal error text
    pub error_text: Option<String>,
    /// Unix timestamp when submitted
    pub created_at: i64,
    /// Unix timestamp of the last change
    pub updated_at: i64,
}

impl BulkTaskRow {
    /// Decoded lifecycle status
    pub fn status(&self) -> BulkTaskStatus {
        BulkTaskStatus::from_i32(self.status)
    }

    /// Convert to the API-facing shape
    pub fn to_info(&self) -> BulkTaskInfo {
        BulkTaskInfo {
            id: self.id,
            user_id: self.user_id,
            status: self.status(),
            total_items: self.total_items.max(0) as u32,
            processed_items: self.processed_items.max(0) as u32,
            failed_items: self.failed_items.max(0) as u32,
            error_text: self.error_text.clone(),
            created_at: ts_to_datetime(self.created_at),
            updated_at: ts_to_datetime(self.updated_at),
        }
    }
}

/// Provider record from database
#[derive(Debug, Clone, FromRow)]
pub struct ProviderRow {
    /// Unique database ID
    pub id: i64,
    /// Unique, immutable provider key
    pub key: String,
    /// Whether the provider is visible to search and scheduling
    pub enabled: i64,
    /// Encrypted credential blob, decrypted through the key vault
    pub config_ciphertext: Option<String>,
    /// Unix timestamp when created
    pub created_at: i64,
}

impl ProviderRow {
    /// Whether the provider is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled != 0
    }
}

/// User record from database
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    /// Unique database ID
    pub id: i64,
    /// Login name
    pub username: String,
    /// Role string ('admin' or 'user')
    pub role: String,
    /// Opaque session token for API auth
    pub session_token: Option<String>,
    /// Unix timestamp when created
    pub created_at: i64,
}

/// Provider pause record
#[derive(Debug, Clone, FromRow)]
pub struct ProviderPauseRow {
    /// Provider key
    pub provider_key: String,
    /// Who paused it
    pub paused_by: String,
    /// Optional operator note
    pub note: Option<String>,
    /// Unix timestamp when paused
    pub paused_at: i64,
}

/// Provider backoff record
#[derive(Debug, Clone, FromRow)]
pub struct ProviderBackoffRow {
    /// Provider key
    pub provider_key: String,
    /// Classified failure reason
    pub reason: String,
    /// Current backoff window in seconds (doubles on repeated hits)
    pub window_secs: i64,
    /// Unix timestamp when the current window started
    pub started_at: i64,
    /// Unix timestamp when the window expires
    pub expires_at: i64,
}

/// Audit trail record
#[derive(Debug, Clone, FromRow)]
pub struct AuditRow {
    /// Unique database ID
    pub id: i64,
    /// Who performed the action ('system', a username, or a user id)
    pub actor: String,
    /// Action name (e.g., "job.completed", "provider.paused")
    pub action: String,
    /// Subject entity type
    pub subject_type: String,
    /// Subject entity id
    pub subject_id: Option<String>,
    /// JSON payload with action context
    pub payload: Option<String>,
    /// Unix timestamp when recorded
    pub created_at: i64,
}

/// Per-user notification record
#[derive(Debug, Clone, FromRow)]
pub struct NotificationRow {
    /// Unique database ID
    pub id: i64,
    /// Recipient user
    pub user_id: i64,
    /// Notification kind (mirrors the SSE event name)
    pub kind: String,
    /// JSON payload
    pub payload: Option<String>,
    /// Unix timestamp when recorded
    pub created_at: i64,
}

/// Catalog cache record
#[derive(Debug, Clone, FromRow)]
pub struct CatalogCacheRow {
    /// Provider key
    pub provider_key: String,
    /// Cache kind: 'menu' or 'variants'
    pub kind: String,
    /// Normalized path or external id
    pub cache_key: String,
    /// Cached JSON payload
    pub payload: String,
    /// Unix timestamp when fetched
    pub fetched_at: i64,
    /// TTL in seconds
    pub ttl_seconds: i64,
}

impl CatalogCacheRow {
    /// Age of the entry at the given instant
    pub fn age_seconds(&self, now: i64) -> i64 {
        (now - self.fetched_at).max(0)
    }

    /// Whether the entry is still within its TTL at the given instant
    pub fn is_fresh(&self, now: i64) -> bool {
        self.age_seconds(now) < self.ttl_seconds
    }
}

/// Convert a stored Unix timestamp to a DateTime, saturating bad values to now
pub(crate) fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

/// Map a sqlx error into the store taxonomy, recognizing write contention
pub(crate) fn map_db_err(context: &str, e: sqlx::Error) -> Error {
    let busy = match &e {
        sqlx::Error::Database(db) => {
            let msg = db.message().to_ascii_lowercase();
            msg.contains("locked") || msg.contains("busy")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    };
    if busy {
        Error::Database(DatabaseError::Busy(format!("{context}: {e}")))
    } else {
        Error::Database(DatabaseError::QueryFailed(format!("{context}: {e}")))
    }
}

/// Database handle for media-dl
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests;
