//! Typed RPC client for the content-transfer daemon.
//!
//! The daemon speaks aria2-style JSON-RPC 2.0 over HTTP. Every call takes
//! the shared secret as its first parameter (`token:<secret>`), numbers on
//! the wire are strings, and transfers are identified by an opaque gid that
//! the rest of the crate treats as a [`Handle`].
//!
//! [`TransferClient`] is the seam the scheduler and worker depend on; tests
//! substitute an in-process implementation.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::{DownloaderConfig, RetryConfig};
use crate::error::DownloaderError;
use crate::retry::{IsRetryable, with_retry};

/// Opaque transfer identifier assigned by the daemon
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle(pub String);

impl Handle {
    /// Borrow the raw gid
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Handle {
    fn from(gid: &str) -> Self {
        Self(gid.to_string())
    }
}

/// Transfer state as reported by the daemon
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DaemonState {
    /// Actively transferring
    Active,
    /// Queued inside the daemon
    Waiting,
    /// Paused inside the daemon
    Paused,
    /// Transfer finished
    Complete,
    /// Transfer failed
    Error,
    /// Removed from the daemon
    Removed,
}

impl DaemonState {
    /// Parse the daemon's status string; unknown states are surfaced rather
    /// than guessed at.
    pub fn parse(s: &str) -> Result<Self, DownloaderError> {
        match s {
            "active" => Ok(DaemonState::Active),
            "waiting" => Ok(DaemonState::Waiting),
            "paused" => Ok(DaemonState::Paused),
            "complete" => Ok(DaemonState::Complete),
            "error" => Ok(DaemonState::Error),
            "removed" => Ok(DaemonState::Removed),
            other => Err(DownloaderError::Unexpected(format!(
                "unknown daemon state: {other}"
            ))),
        }
    }
}

/// One file produced by a transfer
#[derive(Clone, Debug)]
pub struct DaemonFile {
    /// Path on disk
    pub path: PathBuf,
    /// Size in bytes
    pub length: u64,
}

/// Snapshot of one transfer
#[derive(Clone, Debug)]
pub struct DaemonStatus {
    /// Transfer state
    pub state: DaemonState,
    /// Bytes transferred so far
    pub completed_bytes: u64,
    /// Total bytes (0 when unknown)
    pub total_bytes: u64,
    /// Current speed in bytes per second
    pub download_speed_bps: u64,
    /// Files belonging to the transfer
    pub files: Vec<DaemonFile>,
    /// Daemon error code for failed transfers
    pub error_code: Option<String>,
    /// Daemon error message for failed transfers
    pub error_message: Option<String>,
}

/// Options for `add_uri`, serialized with the daemon's kebab-case keys.
/// The daemon expects numeric option values as strings.
#[derive(Clone, Debug, Default)]
pub struct AddUriOptions {
    /// Directory the transfer writes into
    pub dir: Option<PathBuf>,
    /// Output filename override
    pub out: Option<String>,
    /// Per-transfer speed cap in bytes per second
    pub max_download_limit: Option<u64>,
    /// Verify checksums when the source offers them
    pub check_integrity: bool,
    /// Resume partially transferred files
    pub continue_partial: bool,
}

impl AddUriOptions {
    fn to_params(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(dir) = &self.dir {
            map.insert("dir".into(), json!(dir.to_string_lossy()));
        }
        if let Some(out) = &self.out {
            map.insert("out".into(), json!(out));
        }
        if let Some(limit) = self.max_download_limit {
            map.insert("max-download-limit".into(), json!(limit.to_string()));
        }
        if self.check_integrity {
            map.insert("check-integrity".into(), json!("true"));
        }
        if self.continue_partial {
            map.insert("continue".into(), json!("true"));
        }
        serde_json::Value::Object(map)
    }
}

/// Typed calls to the transfer daemon.
///
/// `remove` and `purge` on an unknown handle are treated as no-ops by
/// callers; the daemon's "not found" rejection is swallowed at the call
/// sites that reconcile state.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Create a transfer for the given URLs, returning its handle
    async fn add_uri(
        &self,
        urls: &[String],
        options: AddUriOptions,
    ) -> Result<Handle, DownloaderError>;

    /// Snapshot one transfer
    async fn status(&self, handle: &Handle) -> Result<DaemonStatus, DownloaderError>;

    /// Pause a transfer in place
    async fn pause(&self, handle: &Handle) -> Result<(), DownloaderError>;

    /// Resume a paused transfer
    async fn unpause(&self, handle: &Handle) -> Result<(), DownloaderError>;

    /// Stop a transfer and forget it
    async fn remove(&self, handle: &Handle) -> Result<(), DownloaderError>;

    /// Drop a finished or failed transfer's bookkeeping entry
    async fn purge(&self, handle: &Handle) -> Result<(), DownloaderError>;

    /// Handles of all transfers the daemon considers active
    async fn tell_active(&self) -> Result<Vec<Handle>, DownloaderError>;

    /// Daemon version string, used as the startup reachability probe
    async fn version(&self) -> Result<String, DownloaderError>;
}

impl IsRetryable for DownloaderError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    status: String,
    #[serde(rename = "completedLength", default)]
    completed_length: Option<String>,
    #[serde(rename = "totalLength", default)]
    total_length: Option<String>,
    #[serde(rename = "downloadSpeed", default)]
    download_speed: Option<String>,
    #[serde(default)]
    files: Vec<WireFile>,
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    path: String,
    #[serde(default)]
    length: Option<String>,
}

/// The daemon encodes integers as decimal strings
fn parse_wire_u64(value: Option<&str>) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

impl WireStatus {
    fn into_status(self) -> Result<DaemonStatus, DownloaderError> {
        Ok(DaemonStatus {
            state: DaemonState::parse(&self.status)?,
            completed_bytes: parse_wire_u64(self.completed_length.as_deref()),
            total_bytes: parse_wire_u64(self.total_length.as_deref()),
            download_speed_bps: parse_wire_u64(self.download_speed.as_deref()),
            files: self
                .files
                .into_iter()
                .map(|f| DaemonFile {
                    path: PathBuf::from(f.path),
                    length: parse_wire_u64(f.length.as_deref()),
                })
                .collect(),
            error_code: self.error_code,
            error_message: self.error_message,
        })
    }
}

/// JSON-RPC implementation of [`TransferClient`] over HTTP
pub struct RpcTransferClient {
    http: reqwest::Client,
    rpc_url: String,
    secret: Option<String>,
    request_timeout: Duration,
    status_timeout: Duration,
    retry: RetryConfig,
    next_id: AtomicU64,
}

impl RpcTransferClient {
    /// Build a client from the downloader configuration.
    ///
    /// Network errors are retried with the given policy; JSON-RPC error
    /// objects are not (the daemon answered, the answer was no).
    pub fn new(config: &DownloaderConfig, retry: RetryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_url: config.rpc_url.clone(),
            secret: config.secret.clone(),
            request_timeout: config.request_timeout,
            status_timeout: config.status_timeout,
            retry,
            next_id: AtomicU64::new(1),
        }
    }

    /// Prefix the params list with the secret token, daemon convention
    fn params_with_token(&self, mut params: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
        if let Some(secret) = &self.secret {
            params.insert(0, json!(format!("token:{secret}")));
        }
        params
    }

    async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, DownloaderError> {
        let params = self.params_with_token(params);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id.to_string(),
            "method": method,
            "params": params,
        });

        with_retry(&self.retry, || {
            let body = body.clone();
            async move {
                let response = self
                    .http
                    .post(&self.rpc_url)
                    .timeout(timeout)
                    .json(&body)
                    .send()
                    .await
                    .map_err(classify_reqwest)?;

                let parsed: RpcResponse = response
                    .json()
                    .await
                    .map_err(|e| DownloaderError::Unexpected(format!("bad RPC payload: {e}")))?;

                if let Some(err) = parsed.error {
                    return Err(DownloaderError::Rpc {
                        code: err.code,
                        message: err.message,
                    });
                }

                parsed.result.ok_or_else(|| {
                    DownloaderError::Unexpected("RPC response had neither result nor error".into())
                })
            }
        })
        .await
    }
}

fn classify_reqwest(e: reqwest::Error) -> DownloaderError {
    if e.is_timeout() {
        DownloaderError::Timeout
    } else {
        DownloaderError::Transport(e.to_string())
    }
}

#[async_trait]
impl TransferClient for RpcTransferClient {
    async fn add_uri(
        &self,
        urls: &[String],
        options: AddUriOptions,
    ) -> Result<Handle, DownloaderError> {
        let result = self
            .call(
                "aria2.addUri",
                vec![json!(urls), options.to_params()],
                self.request_timeout,
            )
            .await?;

        match result.as_str() {
            Some(gid) => Ok(Handle(gid.to_string())),
            None => Err(DownloaderError::Unexpected(format!(
                "addUri returned a non-string gid: {result}"
            ))),
        }
    }

    async fn status(&self, handle: &Handle) -> Result<DaemonStatus, DownloaderError> {
        let result = self
            .call(
                "aria2.tellStatus",
                vec![json!(handle.as_str())],
                self.status_timeout,
            )
            .await?;

        let wire: WireStatus = serde_json::from_value(result)
            .map_err(|e| DownloaderError::Unexpected(format!("bad status payload: {e}")))?;
        wire.into_status()
    }

    async fn pause(&self, handle: &Handle) -> Result<(), DownloaderError> {
        self.call(
            "aria2.pause",
            vec![json!(handle.as_str())],
            self.request_timeout,
        )
        .await?;
        Ok(())
    }

    async fn unpause(&self, handle: &Handle) -> Result<(), DownloaderError> {
        self.call(
            "aria2.unpause",
            vec![json!(handle.as_str())],
            self.request_timeout,
        )
        .await?;
        Ok(())
    }

    async fn remove(&self, handle: &Handle) -> Result<(), DownloaderError> {
        self.call(
            "aria2.remove",
            vec![json!(handle.as_str())],
            self.request_timeout,
        )
        .await?;
        Ok(())
    }

    async fn purge(&self, handle: &Handle) -> Result<(), DownloaderError> {
        self.call(
            "aria2.removeDownloadResult",
            vec![json!(handle.as_str())],
            self.request_timeout,
        )
        .await?;
        Ok(())
    }

    async fn tell_active(&self) -> Result<Vec<Handle>, DownloaderError> {
        let result = self
            .call(
                "aria2.tellActive",
                vec![json!(["gid"])],
                self.status_timeout,
            )
            .await?;

        let entries = result.as_array().ok_or_else(|| {
            DownloaderError::Unexpected("tellActive did not return an array".into())
        })?;

        Ok(entries
            .iter()
            .filter_map(|e| e.get("gid").and_then(|g| g.as_str()))
            .map(Handle::from)
            .collect())
    }

    async fn version(&self) -> Result<String, DownloaderError> {
        let result = self
            .call("aria2.getVersion", vec![], self.status_timeout)
            .await?;

        result
            .get("version")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| DownloaderError::Unexpected("getVersion had no version field".into()))
    }
}
