//! Core types for media-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Unique identifier for a download job
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// Create a new JobId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<JobId> for i64 {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for JobId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Job lifecycle status.
///
/// The integer encoding doubles as the canonical status rank used by list
/// queries: active states sort before `queued`, which sorts before terminal
/// states, so `ORDER BY status` yields band ordering directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Bound to a daemon handle, actively transferring
    Downloading,
    /// Claimed by the scheduler, resolving the source URL
    Starting,
    /// Paused by the owner, an admin, or a provider pause
    Paused,
    /// Waiting in the queue for admission
    Queued,
    /// Transfer finished and the file landed in the library
    Completed,
    /// Permanent failure (resolution, daemon, or finalization)
    Failed,
    /// Canceled by the owner or an admin
    Canceled,
    /// Completed job whose library file was explicitly removed
    Deleted,
}

impl JobStatus {
    /// Convert integer status code (the canonical rank) to a JobStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => JobStatus::Downloading,
            1 => JobStatus::Starting,
            2 => JobStatus::Paused,
            3 => JobStatus::Queued,
            4 => JobStatus::Completed,
            5 => JobStatus::Failed,
            6 => JobStatus::Canceled,
            7 => JobStatus::Deleted,
            _ => JobStatus::Failed, // Default to Failed for unknown status
        }
    }

    /// Canonical status rank, also the persisted integer encoding
    pub fn rank(&self) -> i32 {
        match self {
            JobStatus::Downloading => 0,
            JobStatus::Starting => 1,
            JobStatus::Paused => 2,
            JobStatus::Queued => 3,
            JobStatus::Completed => 4,
            JobStatus::Failed => 5,
            JobStatus::Canceled => 6,
            JobStatus::Deleted => 7,
        }
    }

    /// Terminal statuses are absorbing: no transition ever leaves them,
    /// except `completed -> deleted` which stays within the terminal band.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled | JobStatus::Deleted
        )
    }

    /// Active statuses count against the admission concurrency cap
    /// or require worker attention.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Downloading | JobStatus::Starting | JobStatus::Paused
        )
    }

    /// Lowercase wire name, matching the serde encoding
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Downloading => "downloading",
            JobStatus::Starting => "starting",
            JobStatus::Paused => "paused",
            JobStatus::Queued => "queued",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
            JobStatus::Deleted => "deleted",
        }
    }
}

/// Library category a job files under
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Category {
    /// Feature films
    #[default]
    Movies,
    /// Episodic television
    #[serde(rename = "TV")]
    Tv,
    /// Music albums and tracks
    Music,
    /// E-books and documents
    Books,
}

impl Category {
    /// Library subdirectory name for this category
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Movies => "Movies",
            Category::Tv => "TV",
            Category::Music => "Music",
            Category::Books => "Books",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Movies" | "movies" => Ok(Category::Movies),
            "TV" | "tv" | "Tv" => Ok(Category::Tv),
            "Music" | "music" => Ok(Category::Music),
            "Books" | "books" => Ok(Category::Books),
            other => Err(format!("unsupported category: {other}")),
        }
    }
}

/// Role of an authenticated user
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access, sees all jobs and events
    Admin,
    /// Regular user, restricted to own jobs
    User,
}

impl Role {
    /// Parse a persisted role string, defaulting unknown values to User
    pub fn from_db(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }

    /// Persisted role string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

/// Authenticated caller identity, resolved by the API auth layer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    /// User id owning the session
    pub user_id: i64,
    /// Role of the user
    pub role: Role,
}

impl Identity {
    /// Whether this identity has admin privileges
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this identity may mutate the given job owner's jobs
    pub fn may_mutate(&self, owner_id: i64) -> bool {
        self.is_admin() || self.user_id == owner_id
    }
}

/// Who paused a job, recorded so provider resume only touches its own pauses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PauseSource {
    /// Paused by the owner or an admin
    User,
    /// Paused because the provider was paused
    Provider,
}

impl PauseSource {
    /// Persisted string form
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseSource::User => "user",
            PauseSource::Provider => "provider",
        }
    }

    /// Parse the persisted string form
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "user" => Some(PauseSource::User),
            "provider" => Some(PauseSource::Provider),
            _ => None,
        }
    }
}

/// API-facing view of a job row
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    /// Unique job identifier
    pub id: JobId,

    /// Owning user id
    pub user_id: i64,

    /// Provider key the job is bound to
    pub provider: String,

    /// Provider-scoped item key
    pub external_id: String,

    /// Display title
    pub title: String,

    /// Library category
    pub category: Category,

    /// Current lifecycle status
    pub status: JobStatus,

    /// Progress percentage (0.0 to 100.0)
    pub progress: f32,

    /// Current download speed in bytes per second
    pub speed_bps: u64,

    /// Estimated seconds to completion (None if unknown)
    pub eta_seconds: Option<u64>,

    /// Admission priority (lower = earlier; 100 is the default)
    pub priority: i32,

    /// Tiebreak position within a priority band
    pub position: i64,

    /// Opaque daemon handle while the transfer is live
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloader_handle: Option<String>,

    /// Final library path once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_path: Option<String>,

    /// Size of the completed file in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,

    /// Last error message, if any (transient errors clear on recovery)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,

    /// Free-form structured hints (series, season, episode, language, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// When the job was enqueued
    pub created_at: DateTime<Utc>,

    /// When the job row last changed
    pub updated_at: DateTime<Utc>,

    /// When the library file was deleted, for `deleted` jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One item of a queue submission
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct QueueItem {
    /// Provider key
    pub provider: String,

    /// Provider-scoped item key
    pub external_id: String,

    /// Display title (defaults to the external id when absent)
    #[serde(default)]
    pub title: Option<String>,

    /// Free-form structured hints
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,

    /// Admission priority (lower = earlier; defaults to 100)
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Aggregate queue counters
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    /// Total number of jobs
    pub total: usize,

    /// Jobs waiting for admission
    pub queued: usize,

    /// Jobs being bound to the daemon
    pub starting: usize,

    /// Jobs actively transferring
    pub downloading: usize,

    /// Paused jobs
    pub paused: usize,

    /// Completed jobs
    pub completed: usize,

    /// Failed jobs
    pub failed: usize,

    /// Canceled jobs
    pub canceled: usize,

    /// Completed jobs whose file was removed
    pub deleted: usize,

    /// Combined speed of downloading jobs (bytes per second)
    pub total_speed_bps: u64,
}

/// Lifecycle status of a bulk resolution task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BulkTaskStatus {
    /// Waiting for the resolver loop
    Pending,
    /// Being expanded into jobs
    Processing,
    /// All items processed
    Completed,
    /// Aborted by a fatal error
    Failed,
}

impl BulkTaskStatus {
    /// Convert the persisted integer code
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => BulkTaskStatus::Pending,
            1 => BulkTaskStatus::Processing,
            2 => BulkTaskStatus::Completed,
            _ => BulkTaskStatus::Failed,
        }
    }

    /// Persisted integer code
    pub fn to_i32(&self) -> i32 {
        match self {
            BulkTaskStatus::Pending => 0,
            BulkTaskStatus::Processing => 1,
            BulkTaskStatus::Completed => 2,
            BulkTaskStatus::Failed => 3,
        }
    }

    /// Whether the task reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, BulkTaskStatus::Completed | BulkTaskStatus::Failed)
    }
}

/// API-facing view of a bulk resolution task
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct BulkTaskInfo {
    /// Task identifier
    pub id: i64,

    /// Submitting user
    pub user_id: i64,

    /// Current lifecycle status
    pub status: BulkTaskStatus,

    /// Number of items in the submission
    pub total_items: u32,

    /// Items successfully expanded into jobs
    pub processed_items: u32,

    /// Items that could not be resolved
    pub failed_items: u32,

    /// Fatal error text for failed tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,

    /// When the task was submitted
    pub created_at: DateTime<Utc>,

    /// When the task last changed
    pub updated_at: DateTime<Utc>,
}

/// One entry of a bulk submission payload
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct BulkItem {
    /// Provider key
    pub provider: String,

    /// Provider-scoped item key
    pub external_id: String,

    /// Free-form hints forwarded into the created job's metadata
    #[serde(default)]
    pub hints: Option<serde_json::Value>,
}

/// Event emitted through the bus on job and coordination state changes
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Any tracked field of a job changed
    JobUpdated {
        /// Snapshot of the job after the change
        job: JobInfo,
    },

    /// A job reached `completed`
    JobCompleted {
        /// Snapshot of the completed job
        job: JobInfo,
    },

    /// A job reached `failed`
    JobFailed {
        /// Snapshot of the failed job
        job: JobInfo,
    },

    /// A job was canceled
    JobCanceled {
        /// Snapshot of the canceled job
        job: JobInfo,
    },

    /// A job was paused
    JobPaused {
        /// Snapshot of the paused job
        job: JobInfo,
    },

    /// A paused job resumed
    JobResumed {
        /// Snapshot of the resumed job
        job: JobInfo,
    },

    /// A completed job's library file was deleted
    JobDeleted {
        /// Snapshot of the deleted job
        job: JobInfo,
    },

    /// A job row left the visible queue (cancel-and-remove)
    JobRemoved {
        /// The removed job id
        id: JobId,
        /// Owner of the removed job
        user_id: i64,
    },

    /// The scheduler cannot admit jobs (for example, low disk space)
    SchedulerBlocked {
        /// Human-readable reason
        reason: String,
        /// Free bytes observed on the downloads mount
        available_bytes: u64,
        /// Bytes required by the configured floor
        required_bytes: u64,
    },

    /// A provider was paused by an admin
    ProviderPaused {
        /// Provider key
        provider: String,
        /// Who paused it
        paused_by: String,
        /// Optional operator note
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },

    /// A provider pause was cleared
    ProviderResumed {
        /// Provider key
        provider: String,
    },

    /// Graceful shutdown initiated
    Shutdown,
}

impl Event {
    /// Dotted SSE event name
    pub fn sse_name(&self) -> &'static str {
        match self {
            Event::JobUpdated { .. } => "job.updated",
            Event::JobCompleted { .. } => "job.completed",
            Event::JobFailed { .. } => "job.failed",
            Event::JobCanceled { .. } => "job.canceled",
            Event::JobPaused { .. } => "job.paused",
            Event::JobResumed { .. } => "job.resumed",
            Event::JobDeleted { .. } => "job.deleted",
            Event::JobRemoved { .. } => "job.removed",
            Event::SchedulerBlocked { .. } => "scheduler.blocked",
            Event::ProviderPaused { .. } => "provider.paused",
            Event::ProviderResumed { .. } => "provider.resumed",
            Event::Shutdown => "shutdown",
        }
    }

    /// Owning user of the event, when it is scoped to one
    pub fn user_id(&self) -> Option<i64> {
        match self {
            Event::JobUpdated { job }
            | Event::JobCompleted { job }
            | Event::JobFailed { job }
            | Event::JobCanceled { job }
            | Event::JobPaused { job }
            | Event::JobResumed { job }
            | Event::JobDeleted { job } => Some(job.user_id),
            Event::JobRemoved { user_id, .. } => Some(*user_id),
            Event::SchedulerBlocked { .. }
            | Event::ProviderPaused { .. }
            | Event::ProviderResumed { .. }
            | Event::Shutdown => None,
        }
    }

    /// Whether a subscriber with the given identity should receive this event.
    ///
    /// Admins see everything; other users only see events scoped to their
    /// own jobs. Unscoped events (scheduler, provider) are admin-only.
    pub fn visible_to(&self, identity: &Identity) -> bool {
        if identity.is_admin() {
            return true;
        }
        match self.user_id() {
            Some(uid) => uid == identity.user_id,
            None => matches!(self, Event::Shutdown),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // --- JobStatus rank encoding ---

    #[test]
    fn status_round_trips_through_rank_for_all_variants() {
        let cases = [
            (JobStatus::Downloading, 0),
            (JobStatus::Starting, 1),
            (JobStatus::Paused, 2),
            (JobStatus::Queued, 3),
            (JobStatus::Completed, 4),
            (JobStatus::Failed, 5),
            (JobStatus::Canceled, 6),
            (JobStatus::Deleted, 7),
        ];

        for (variant, expected) in cases {
            assert_eq!(
                variant.rank(),
                expected,
                "{variant:?} should encode to rank {expected}"
            );
            assert_eq!(
                JobStatus::from_i32(expected),
                variant,
                "rank {expected} should decode to {variant:?}"
            );
        }
    }

    #[test]
    fn status_from_unknown_integer_defaults_to_failed() {
        assert_eq!(
            JobStatus::from_i32(99),
            JobStatus::Failed,
            "unknown status must fall back to Failed so corrupted rows surface visibly"
        );
        assert_eq!(JobStatus::from_i32(-1), JobStatus::Failed);
    }

    #[test]
    fn rank_orders_active_before_queued_before_terminal() {
        let active = [
            JobStatus::Downloading,
            JobStatus::Starting,
            JobStatus::Paused,
        ];
        let terminal = [
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Canceled,
            JobStatus::Deleted,
        ];

        for a in active {
            assert!(
                a.rank() < JobStatus::Queued.rank(),
                "{a:?} must sort before queued in list queries"
            );
        }
        for t in terminal {
            assert!(
                JobStatus::Queued.rank() < t.rank(),
                "queued must sort before terminal {t:?}"
            );
        }
    }

    #[test]
    fn terminal_and_active_partition_the_status_space() {
        for code in 0..8 {
            let status = JobStatus::from_i32(code);
            let in_queue = status == JobStatus::Queued;
            assert!(
                status.is_terminal() || status.is_active() || in_queue,
                "{status:?} must be terminal, active, or queued"
            );
            assert!(
                !(status.is_terminal() && status.is_active()),
                "{status:?} cannot be both terminal and active"
            );
        }
    }

    // --- Category ---

    #[test]
    fn category_parses_case_insensitive_names() {
        assert_eq!(Category::from_str("Movies").unwrap(), Category::Movies);
        assert_eq!(Category::from_str("tv").unwrap(), Category::Tv);
        assert_eq!(Category::from_str("TV").unwrap(), Category::Tv);
        assert_eq!(Category::from_str("music").unwrap(), Category::Music);
    }

    #[test]
    fn category_rejects_unknown_names() {
        let err = Category::from_str("podcasts").unwrap_err();
        assert!(
            err.contains("unsupported category"),
            "unknown category must be a validation error, got: {err}"
        );
    }

    #[test]
    fn category_serializes_tv_in_uppercase() {
        let json = serde_json::to_string(&Category::Tv).unwrap();
        assert_eq!(json, "\"TV\"", "TV must serialize as its library name");
    }

    // --- JobId conversions ---

    #[test]
    fn job_id_from_i64_and_back() {
        let id = JobId::from(42_i64);
        let raw: i64 = id.into();
        assert_eq!(raw, 42);
    }

    #[test]
    fn job_id_from_str_rejects_non_numeric() {
        assert!(JobId::from_str("abc").is_err());
        assert!(JobId::from_str("").is_err());
        assert!(JobId::from_str("3.14").is_err());
    }

    #[test]
    fn job_id_display_matches_inner_value() {
        assert_eq!(JobId::new(999).to_string(), "999");
    }

    // --- Identity and event visibility ---

    fn admin() -> Identity {
        Identity {
            user_id: 1,
            role: Role::Admin,
        }
    }

    fn user(id: i64) -> Identity {
        Identity {
            user_id: id,
            role: Role::User,
        }
    }

    fn job_event(user_id: i64) -> Event {
        Event::JobRemoved {
            id: JobId::new(1),
            user_id,
        }
    }

    #[test]
    fn admin_may_mutate_any_job() {
        assert!(admin().may_mutate(999));
    }

    #[test]
    fn user_may_mutate_only_own_jobs() {
        assert!(user(5).may_mutate(5));
        assert!(!user(5).may_mutate(6));
    }

    #[test]
    fn admin_sees_all_events() {
        assert!(job_event(42).visible_to(&admin()));
        assert!(
            Event::SchedulerBlocked {
                reason: "low disk".into(),
                available_bytes: 0,
                required_bytes: 1,
            }
            .visible_to(&admin())
        );
    }

    #[test]
    fn user_sees_only_own_job_events() {
        assert!(job_event(5).visible_to(&user(5)));
        assert!(!job_event(5).visible_to(&user(6)));
    }

    #[test]
    fn unscoped_events_are_hidden_from_regular_users() {
        let blocked = Event::SchedulerBlocked {
            reason: "low disk".into(),
            available_bytes: 0,
            required_bytes: 1,
        };
        assert!(!blocked.visible_to(&user(5)));

        let paused = Event::ProviderPaused {
            provider: "webshare".into(),
            paused_by: "admin".into(),
            note: None,
        };
        assert!(!paused.visible_to(&user(5)));
    }

    #[test]
    fn shutdown_is_visible_to_everyone() {
        assert!(Event::Shutdown.visible_to(&user(5)));
        assert!(Event::Shutdown.visible_to(&admin()));
    }

    #[test]
    fn sse_names_use_dotted_form() {
        assert_eq!(job_event(1).sse_name(), "job.removed");
        assert_eq!(Event::Shutdown.sse_name(), "shutdown");
        assert_eq!(
            Event::ProviderResumed {
                provider: "webshare".into()
            }
            .sse_name(),
            "provider.resumed"
        );
    }

    // --- BulkTaskStatus ---

    #[test]
    fn bulk_status_round_trips_through_i32() {
        for (variant, code) in [
            (BulkTaskStatus::Pending, 0),
            (BulkTaskStatus::Processing, 1),
            (BulkTaskStatus::Completed, 2),
            (BulkTaskStatus::Failed, 3),
        ] {
            assert_eq!(variant.to_i32(), code);
            assert_eq!(BulkTaskStatus::from_i32(code), variant);
        }
    }

    #[test]
    fn bulk_status_terminality() {
        assert!(!BulkTaskStatus::Pending.is_terminal());
        assert!(!BulkTaskStatus::Processing.is_terminal());
        assert!(BulkTaskStatus::Completed.is_terminal());
        assert!(BulkTaskStatus::Failed.is_terminal());
    }

    #[test]
    fn pause_source_round_trips() {
        assert_eq!(
            PauseSource::from_db(PauseSource::User.as_str()),
            Some(PauseSource::User)
        );
        assert_eq!(
            PauseSource::from_db(PauseSource::Provider.as_str()),
            Some(PauseSource::Provider)
        );
        assert_eq!(PauseSource::from_db("daemon"), None);
    }
}
