//! Error types for media-dl
//!
//! This module provides comprehensive error handling for the library, including:
//! - Domain-specific error types (Provider, Downloader, Finalize, Job, etc.)
//! - The transient/permanent classification driving scheduler and worker retries
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "paths.downloads")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Provider capability call failed
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Transfer daemon RPC failed
    #[error("downloader error: {0}")]
    Downloader(#[from] DownloaderError),

    /// Job state or ownership error
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Finalization (library move) failed
    #[error("finalization error: {0}")]
    Finalize(#[from] FinalizeError),

    /// Malformed request payload
    #[error("validation error: {0}")]
    Validation(String),

    /// Caller lacks permission for the operation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new work")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Insufficient disk space on the downloads mount
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required by the configured floor
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// Store contention exhausted its retries
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Writer contention (SQLITE_BUSY / locked)
    #[error("database busy: {0}")]
    Busy(String),
}

/// Errors returned by provider capability calls.
///
/// The scheduler, worker, and bulk resolver translate these into the
/// transient/permanent halves of the error taxonomy: transient kinds send a
/// job back to `queued` and install a backoff entry, permanent kinds fail it.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Provider asked us to slow down (HTTP 429 or equivalent)
    #[error("rate limited by provider{}", retry_after_display(.retry_after_seconds))]
    RateLimited {
        /// Seconds the provider asked us to wait, if it said
        retry_after_seconds: Option<u64>,
    },

    /// Session or token expired but is refreshable
    #[error("provider authentication expired")]
    AuthExpired,

    /// Upstream returned a server error
    #[error("provider upstream error: HTTP {status}")]
    Upstream {
        /// HTTP status returned by the provider
        status: u16,
    },

    /// Provider call timed out
    #[error("provider request timed out")]
    Timeout,

    /// Transport-level failure reaching the provider
    #[error("provider network error: {0}")]
    Network(String),

    /// Item does not exist on the provider
    #[error("item not found on provider: {0}")]
    ItemNotFound(String),

    /// Credentials rejected even after re-authentication
    #[error("provider credentials invalid")]
    InvalidCredentials,

    /// Provider cannot perform the requested operation
    #[error("provider does not support {0}")]
    Unsupported(String),

    /// Provider returned something we could not interpret
    #[error("provider protocol error: {0}")]
    Protocol(String),
}

fn retry_after_display(secs: &Option<u64>) -> String {
    match secs {
        Some(s) => format!(" (retry after {s}s)"),
        None => String::new(),
    }
}

impl ProviderError {
    /// Whether the scheduler should requeue and back off rather than fail the job
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::AuthExpired
            | ProviderError::Timeout
            | ProviderError::Network(_) => true,
            ProviderError::Upstream { status } => *status >= 500,
            ProviderError::ItemNotFound(_)
            | ProviderError::InvalidCredentials
            | ProviderError::Unsupported(_)
            | ProviderError::Protocol(_) => false,
        }
    }

    /// Suggested backoff window override, when the provider supplied one
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited {
                retry_after_seconds,
            } => *retry_after_seconds,
            _ => None,
        }
    }
}

/// Errors returned by the transfer daemon RPC client
#[derive(Debug, Clone, Error)]
pub enum DownloaderError {
    /// Could not reach the daemon (connect failure, reset, DNS)
    #[error("downloader unreachable: {0}")]
    Transport(String),

    /// RPC call timed out
    #[error("downloader request timed out")]
    Timeout,

    /// Daemon returned a JSON-RPC error object
    #[error("downloader rejected the call (code {code}): {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// JSON-RPC error message
        message: String,
    },

    /// Daemon reported a state or payload we do not understand
    #[error("unexpected downloader response: {0}")]
    Unexpected(String),
}

impl DownloaderError {
    /// Transport-level failures are transient: the scheduler holds briefly
    /// and requeues. RPC rejections and protocol surprises are permanent
    /// for the job that triggered them.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DownloaderError::Transport(_) | DownloaderError::Timeout
        )
    }
}

/// Job state and ownership errors
#[derive(Debug, Error)]
pub enum JobError {
    /// Job not found
    #[error("job {id} not found")]
    NotFound {
        /// The job id that was not found
        id: i64,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} job {id} in state {current_state}")]
    InvalidState {
        /// The job id in an invalid state for the operation
        id: i64,
        /// The operation that was attempted (e.g., "pause", "resume")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },

    /// A concurrent writer won the status transition
    #[error("job {id} transition conflict: expected {expected}, found {found}")]
    TransitionConflict {
        /// The job id whose transition was lost
        id: i64,
        /// The status the caller expected
        expected: String,
        /// The status actually stored
        found: String,
    },
}

/// Finalization errors (library move and its guards)
#[derive(Debug, Error)]
pub enum FinalizeError {
    /// Daemon reported no files for a completed transfer
    #[error("no files reported for completed transfer")]
    NoFiles,

    /// The selected output file is empty
    #[error("completed file is empty: {path}")]
    EmptyFile {
        /// Path of the zero-byte file
        path: PathBuf,
    },

    /// The reported path looks like it escapes the downloads root
    #[error("suspicious output path {path}: {reason}")]
    SuspiciousPath {
        /// The rejected path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// Move into the library failed
    #[error("failed to move {source_path} to {dest_path}: {reason}")]
    MoveFailed {
        /// Source path of the file being moved
        source_path: PathBuf,
        /// Destination path in the library
        dest_path: PathBuf,
        /// The reason the move failed
        reason: String,
    },

    /// Copy fallback produced a file of the wrong size
    #[error("size mismatch after copy: expected {expected} bytes, found {actual}")]
    SizeMismatch {
        /// Source file size
        expected: u64,
        /// Copied file size
        actual: u64,
    },

    /// Target directory could not be created or written
    #[error("library target unwritable {path}: {reason}")]
    TargetUnwritable {
        /// The directory that could not be prepared
        path: PathBuf,
        /// The underlying I/O failure
        reason: String,
    },
}

/// API error response format
///
/// This structure is returned by API endpoints when an error occurs.
/// It follows a standard format with machine-readable error codes,
/// human-readable messages, and optional contextual details.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "job 123 not found",
///     "details": {
///       "job_id": 123
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create a "forbidden" error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }

    /// Create a "service unavailable" error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new("service_unavailable", message)
    }
}

/// Convert errors to HTTP status codes for API responses
///
/// This trait maps domain errors to appropriate HTTP status codes.
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,
            Error::Validation(_) => 400,

            // 403 Forbidden - ownership / RBAC denials
            Error::Forbidden(_) => 403,

            // 404 Not Found
            Error::NotFound(_) => 404,
            Error::Job(JobError::NotFound { .. }) => 404,

            // 409 Conflict - state machine says no
            Error::Job(JobError::InvalidState { .. }) => 409,
            Error::Job(JobError::TransitionConflict { .. }) => 409,

            // 422 Unprocessable Entity - Semantic errors
            Error::Finalize(_) => 422,
            Error::InsufficientSpace { .. } => 422,

            // 500 Internal Server Error - Server-side issues
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::DiskSpaceCheckFailed(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - External collaborators misbehaving
            Error::Provider(_) => 502,
            Error::Downloader(_) => 502,
            Error::Network(_) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
            Error::Unavailable(_) => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Provider(e) => match e {
                ProviderError::RateLimited { .. } => "provider_rate_limited",
                ProviderError::AuthExpired => "provider_auth_expired",
                ProviderError::Upstream { .. } => "provider_upstream_error",
                ProviderError::Timeout => "provider_timeout",
                ProviderError::Network(_) => "provider_network_error",
                ProviderError::ItemNotFound(_) => "provider_item_not_found",
                ProviderError::InvalidCredentials => "provider_invalid_credentials",
                ProviderError::Unsupported(_) => "provider_unsupported",
                ProviderError::Protocol(_) => "provider_protocol_error",
            },
            Error::Downloader(e) => match e {
                DownloaderError::Transport(_) => "downloader_unreachable",
                DownloaderError::Timeout => "downloader_timeout",
                DownloaderError::Rpc { .. } => "downloader_rejected",
                DownloaderError::Unexpected(_) => "downloader_unexpected",
            },
            Error::Job(e) => match e {
                JobError::NotFound { .. } => "job_not_found",
                JobError::InvalidState { .. } => "invalid_state",
                JobError::TransitionConflict { .. } => "transition_conflict",
            },
            Error::Finalize(_) => "finalization_error",
            Error::Validation(_) => "validation_error",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Io(_) => "io_error",
            Error::InsufficientSpace { .. } => "insufficient_space",
            Error::DiskSpaceCheckFailed(_) => "disk_space_check_failed",
            Error::Unavailable(_) => "store_unavailable",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl Error {
    /// Process exit code for CLI drivers that fail during startup:
    /// 1 = configuration invalid, 2 = store unreachable,
    /// 3 = downloader unreachable after the startup grace.
    pub fn startup_exit_code(&self) -> i32 {
        match self {
            Error::Config { .. } | Error::Validation(_) => 1,
            Error::Database(_) | Error::Sqlx(_) | Error::Unavailable(_) => 2,
            Error::Downloader(_) => 3,
            _ => 1,
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        // Add contextual details for specific error types
        let details = match &error {
            Error::Job(JobError::NotFound { id }) => Some(serde_json::json!({
                "job_id": id,
            })),
            Error::Job(JobError::InvalidState {
                id,
                operation,
                current_state,
            }) => Some(serde_json::json!({
                "job_id": id,
                "operation": operation,
                "current_state": current_state,
            })),
            Error::Job(JobError::TransitionConflict { id, expected, found }) => {
                Some(serde_json::json!({
                    "job_id": id,
                    "expected": expected,
                    "found": found,
                }))
            }
            Error::InsufficientSpace {
                required,
                available,
            } => Some(serde_json::json!({
                "required_bytes": required,
                "available_bytes": available,
            })),
            Error::Provider(ProviderError::RateLimited {
                retry_after_seconds,
            }) => Some(serde_json::json!({
                "retry_after_seconds": retry_after_seconds,
            })),
            Error::Finalize(FinalizeError::MoveFailed {
                source_path,
                dest_path,
                ..
            }) => Some(serde_json::json!({
                "source_path": source_path,
                "dest_path": dest_path,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    /// Returns (Error, expected_status_code, expected_error_code) for a
    /// representative sample of every match arm in ToHttpStatus.
    fn representative_variants() -> Vec<(Error, u16, &'static str)> {
        vec![
            (
                Error::Config {
                    message: "bad value".into(),
                    key: Some("paths.downloads".into()),
                },
                400,
                "config_error",
            ),
            (
                Error::Validation("unknown provider key: nope".into()),
                400,
                "validation_error",
            ),
            (
                Error::Forbidden("not the owner".into()),
                403,
                "forbidden",
            ),
            (Error::NotFound("job 99".into()), 404, "not_found"),
            (
                Error::Job(JobError::NotFound { id: 42 }),
                404,
                "job_not_found",
            ),
            (
                Error::Job(JobError::InvalidState {
                    id: 42,
                    operation: "pause".into(),
                    current_state: "completed".into(),
                }),
                409,
                "invalid_state",
            ),
            (
                Error::Job(JobError::TransitionConflict {
                    id: 42,
                    expected: "starting".into(),
                    found: "canceled".into(),
                }),
                409,
                "transition_conflict",
            ),
            (
                Error::Finalize(FinalizeError::NoFiles),
                422,
                "finalization_error",
            ),
            (
                Error::InsufficientSpace {
                    required: 1_000_000,
                    available: 500,
                },
                422,
                "insufficient_space",
            ),
            (
                Error::Database(DatabaseError::QueryFailed("timeout".into())),
                500,
                "database_error",
            ),
            (
                Error::Provider(ProviderError::RateLimited {
                    retry_after_seconds: Some(60),
                }),
                502,
                "provider_rate_limited",
            ),
            (
                Error::Downloader(DownloaderError::Transport("connection refused".into())),
                502,
                "downloader_unreachable",
            ),
            (Error::ShuttingDown, 503, "shutting_down"),
            (
                Error::Unavailable("write lock contention".into()),
                503,
                "store_unavailable",
            ),
        ]
    }

    #[test]
    fn every_variant_maps_to_expected_status_code() {
        for (error, expected_status, expected_code) in representative_variants() {
            assert_eq!(
                error.status_code(),
                expected_status,
                "variant {expected_code} returned wrong status"
            );
            assert_eq!(
                error.error_code(),
                expected_code,
                "variant with status {expected_status} returned wrong code"
            );
        }
    }

    // --- transient/permanent classification (the heart of the taxonomy) ---

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        assert!(
            ProviderError::RateLimited {
                retry_after_seconds: None
            }
            .is_transient()
        );
        assert!(ProviderError::AuthExpired.is_transient());
        assert!(ProviderError::Upstream { status: 503 }.is_transient());
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::Network("reset".into()).is_transient());
    }

    #[test]
    fn not_found_and_credential_errors_are_permanent() {
        assert!(!ProviderError::ItemNotFound("abc".into()).is_transient());
        assert!(!ProviderError::InvalidCredentials.is_transient());
        assert!(!ProviderError::Unsupported("resolve".into()).is_transient());
        assert!(!ProviderError::Protocol("bad json".into()).is_transient());
    }

    #[test]
    fn upstream_4xx_is_permanent_but_5xx_is_transient() {
        assert!(
            !ProviderError::Upstream { status: 404 }.is_transient(),
            "a 404 from the provider means the item is gone, not busy"
        );
        assert!(ProviderError::Upstream { status: 500 }.is_transient());
    }

    #[test]
    fn retry_after_surfaces_only_for_rate_limits() {
        assert_eq!(
            ProviderError::RateLimited {
                retry_after_seconds: Some(120)
            }
            .retry_after(),
            Some(120)
        );
        assert_eq!(ProviderError::Timeout.retry_after(), None);
    }

    #[test]
    fn downloader_transport_is_transient_but_rpc_rejection_is_not() {
        assert!(DownloaderError::Transport("refused".into()).is_transient());
        assert!(DownloaderError::Timeout.is_transient());
        assert!(
            !DownloaderError::Rpc {
                code: 1,
                message: "bad uri".into()
            }
            .is_transient(),
            "a rejected URI will be rejected again; the job must fail"
        );
        assert!(!DownloaderError::Unexpected("martian state".into()).is_transient());
    }

    // --- startup exit codes ---

    #[test]
    fn startup_exit_codes_match_the_cli_contract() {
        let config = Error::Config {
            message: "bad".into(),
            key: None,
        };
        assert_eq!(config.startup_exit_code(), 1);

        let store = Error::Database(DatabaseError::ConnectionFailed("refused".into()));
        assert_eq!(store.startup_exit_code(), 2);

        let daemon = Error::Downloader(DownloaderError::Transport("refused".into()));
        assert_eq!(daemon.startup_exit_code(), 3);
    }

    // --- ApiError conversion ---

    #[test]
    fn api_error_from_job_not_found_has_job_id() {
        let err = Error::Job(JobError::NotFound { id: 42 });
        let api: ApiError = err.into();

        assert_eq!(api.error.code, "job_not_found");
        let details = api.error.details.expect("should have details");
        assert_eq!(details["job_id"], 42);
    }

    #[test]
    fn api_error_from_invalid_state_has_operation_and_current_state() {
        let err = Error::Job(JobError::InvalidState {
            id: 3,
            operation: "resume".into(),
            current_state: "completed".into(),
        });
        let api: ApiError = err.into();

        assert_eq!(api.error.code, "invalid_state");
        let details = api.error.details.expect("should have details");
        assert_eq!(details["job_id"], 3);
        assert_eq!(details["operation"], "resume");
        assert_eq!(details["current_state"], "completed");
    }

    #[test]
    fn api_error_from_insufficient_space_has_byte_counts() {
        let err = Error::InsufficientSpace {
            required: 5_000_000,
            available: 1_000,
        };
        let api: ApiError = err.into();

        let details = api.error.details.expect("should have details");
        assert_eq!(details["required_bytes"], 5_000_000_u64);
        assert_eq!(details["available_bytes"], 1_000_u64);
    }

    #[test]
    fn api_error_from_validation_has_no_details() {
        let api: ApiError = Error::Validation("bad payload".into()).into();
        assert_eq!(api.error.code, "validation_error");
        assert!(api.error.details.is_none());
    }

    #[test]
    fn api_error_message_matches_error_display() {
        let err = Error::Job(JobError::InvalidState {
            id: 5,
            operation: "resume".into(),
            current_state: "completed".into(),
        });
        let display_msg = err.to_string();
        let api: ApiError = err.into();

        assert_eq!(api.error.message, display_msg);
    }

    #[test]
    fn api_error_without_details_omits_details_in_json() {
        let api = ApiError::new("test_code", "test message");

        let json_str = serde_json::to_string(&api).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json_str).unwrap();

        assert_eq!(parsed["error"]["code"], "test_code");
        assert!(
            parsed["error"].get("details").is_none(),
            "details field should be omitted from JSON when None"
        );
    }

    #[test]
    fn api_error_factories_produce_expected_codes() {
        assert_eq!(ApiError::not_found("job 1").error.code, "not_found");
        assert_eq!(ApiError::validation("x").error.code, "validation_error");
        assert_eq!(ApiError::forbidden("x").error.code, "forbidden");
        assert_eq!(ApiError::internal("x").error.code, "internal_error");
        assert_eq!(ApiError::unauthorized("x").error.code, "unauthorized");
        assert_eq!(
            ApiError::service_unavailable("x").error.code,
            "service_unavailable"
        );
    }

    #[test]
    fn rate_limited_display_includes_retry_hint() {
        let err = ProviderError::RateLimited {
            retry_after_seconds: Some(60),
        };
        assert!(err.to_string().contains("retry after 60s"));

        let bare = ProviderError::RateLimited {
            retry_after_seconds: None,
        };
        assert!(!bare.to_string().contains("retry after"));
    }
}
