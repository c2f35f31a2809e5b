//! Shared test doubles: an in-process transfer daemon and scriptable
//! provider capabilities.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::downloader::{
    AddUriOptions, DaemonFile, DaemonState, DaemonStatus, Handle, TransferClient,
};
use crate::error::{DownloaderError, ProviderError};
use crate::providers::{
    Browsable, MenuPage, ProviderStatus, Resolvable, ResolvedSource, SearchItem, Searchable,
    StatusCapable, Variant, VariantListable,
};

/// One add_uri call as observed by the mock daemon
#[derive(Clone, Debug)]
pub struct AddedTransfer {
    pub urls: Vec<String>,
    pub options: AddUriOptions,
    pub handle: Handle,
}

/// In-process transfer daemon with scriptable per-handle statuses
pub struct MockTransferClient {
    next_gid: AtomicU64,
    statuses: Mutex<HashMap<String, DaemonStatus>>,
    added: Mutex<Vec<AddedTransfer>>,
    paused: Mutex<Vec<String>>,
    unpaused: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    purged: Mutex<Vec<String>>,
    fail_add_with: Mutex<Option<DownloaderError>>,
}

impl MockTransferClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_gid: AtomicU64::new(1),
            statuses: Mutex::new(HashMap::new()),
            added: Mutex::new(Vec::new()),
            paused: Mutex::new(Vec::new()),
            unpaused: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            purged: Mutex::new(Vec::new()),
            fail_add_with: Mutex::new(None),
        })
    }

    /// Make the next add_uri calls fail with the given error
    pub async fn fail_add_with(&self, error: DownloaderError) {
        *self.fail_add_with.lock().await = Some(error);
    }

    /// Stop failing add_uri
    pub async fn heal(&self) {
        *self.fail_add_with.lock().await = None;
    }

    /// Overwrite the status of a handle
    pub async fn set_status(&self, handle: &Handle, status: DaemonStatus) {
        self.statuses
            .lock()
            .await
            .insert(handle.as_str().to_string(), status);
    }

    /// Script a handle as actively transferring
    pub async fn set_active(&self, handle: &Handle, completed: u64, total: u64, speed: u64) {
        self.set_status(
            handle,
            DaemonStatus {
                state: DaemonState::Active,
                completed_bytes: completed,
                total_bytes: total,
                download_speed_bps: speed,
                files: vec![],
                error_code: None,
                error_message: None,
            },
        )
        .await;
    }

    /// Script a handle as complete with one produced file
    pub async fn set_complete(&self, handle: &Handle, path: &std::path::Path, size: u64) {
        self.set_status(
            handle,
            DaemonStatus {
                state: DaemonState::Complete,
                completed_bytes: size,
                total_bytes: size,
                download_speed_bps: 0,
                files: vec![DaemonFile {
                    path: path.to_path_buf(),
                    length: size,
                }],
                error_code: None,
                error_message: None,
            },
        )
        .await;
    }

    /// Script a handle as failed
    pub async fn set_error(&self, handle: &Handle, code: &str, message: &str) {
        self.set_status(
            handle,
            DaemonStatus {
                state: DaemonState::Error,
                completed_bytes: 0,
                total_bytes: 0,
                download_speed_bps: 0,
                files: vec![],
                error_code: Some(code.to_string()),
                error_message: Some(message.to_string()),
            },
        )
        .await;
    }

    pub async fn added(&self) -> Vec<AddedTransfer> {
        self.added.lock().await.clone()
    }

    pub async fn paused_handles(&self) -> Vec<String> {
        self.paused.lock().await.clone()
    }

    pub async fn unpaused_handles(&self) -> Vec<String> {
        self.unpaused.lock().await.clone()
    }

    pub async fn removed_handles(&self) -> Vec<String> {
        self.removed.lock().await.clone()
    }

    pub async fn purged_handles(&self) -> Vec<String> {
        self.purged.lock().await.clone()
    }
}

#[async_trait]
impl TransferClient for MockTransferClient {
    async fn add_uri(
        &self,
        urls: &[String],
        options: AddUriOptions,
    ) -> Result<Handle, DownloaderError> {
        if let Some(err) = self.fail_add_with.lock().await.clone() {
            return Err(err);
        }

        let gid = format!("gid-{}", self.next_gid.fetch_add(1, Ordering::SeqCst));
        let handle = Handle(gid.clone());

        self.statuses.lock().await.insert(
            gid,
            DaemonStatus {
                state: DaemonState::Active,
                completed_bytes: 0,
                total_bytes: 0,
                download_speed_bps: 0,
                files: vec![],
                error_code: None,
                error_message: None,
            },
        );
        self.added.lock().await.push(AddedTransfer {
            urls: urls.to_vec(),
            options,
            handle: handle.clone(),
        });

        Ok(handle)
    }

    async fn status(&self, handle: &Handle) -> Result<DaemonStatus, DownloaderError> {
        self.statuses
            .lock()
            .await
            .get(handle.as_str())
            .cloned()
            .ok_or_else(|| DownloaderError::Rpc {
                code: 1,
                message: format!("{handle} is not found"),
            })
    }

    async fn pause(&self, handle: &Handle) -> Result<(), DownloaderError> {
        let mut statuses = self.statuses.lock().await;
        if let Some(status) = statuses.get_mut(handle.as_str()) {
            status.state = DaemonState::Paused;
            status.download_speed_bps = 0;
        }
        self.paused.lock().await.push(handle.as_str().to_string());
        Ok(())
    }

    async fn unpause(&self, handle: &Handle) -> Result<(), DownloaderError> {
        let mut statuses = self.statuses.lock().await;
        if let Some(status) = statuses.get_mut(handle.as_str()) {
            status.state = DaemonState::Active;
        }
        self.unpaused.lock().await.push(handle.as_str().to_string());
        Ok(())
    }

    async fn remove(&self, handle: &Handle) -> Result<(), DownloaderError> {
        self.statuses.lock().await.remove(handle.as_str());
        self.removed.lock().await.push(handle.as_str().to_string());
        Ok(())
    }

    async fn purge(&self, handle: &Handle) -> Result<(), DownloaderError> {
        self.statuses.lock().await.remove(handle.as_str());
        self.purged.lock().await.push(handle.as_str().to_string());
        Ok(())
    }

    async fn tell_active(&self) -> Result<Vec<Handle>, DownloaderError> {
        Ok(self
            .statuses
            .lock()
            .await
            .keys()
            .map(|gid| Handle(gid.clone()))
            .collect())
    }

    async fn version(&self) -> Result<String, DownloaderError> {
        Ok("mock-1.0".to_string())
    }
}

/// Resolvable with a scriptable outcome per call
pub struct ScriptedResolver {
    outcomes: Mutex<Vec<Result<String, ProviderError>>>,
    fallback_url: String,
    pub calls: AtomicU64,
}

impl ScriptedResolver {
    /// Always resolves to `<base>/<external_id>`
    pub fn always(base: &str) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(Vec::new()),
            fallback_url: base.to_string(),
            calls: AtomicU64::new(0),
        })
    }

    /// Queue an outcome for the next call (drained in order)
    pub async fn push_outcome(&self, outcome: Result<String, ProviderError>) {
        self.outcomes.lock().await.push(outcome);
    }
}

#[async_trait]
impl Resolvable for ScriptedResolver {
    async fn resolve_download_url(
        &self,
        external_id: &str,
    ) -> Result<ResolvedSource, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = {
            let mut outcomes = self.outcomes.lock().await;
            if outcomes.is_empty() {
                None
            } else {
                Some(outcomes.remove(0))
            }
        };

        let url = match scripted {
            Some(Ok(url)) => url,
            Some(Err(e)) => return Err(e),
            None => format!("{}/{}", self.fallback_url, external_id),
        };

        let parsed = url::Url::parse(&url)
            .map_err(|e| ProviderError::Protocol(format!("bad scripted url: {e}")))?;
        Ok(ResolvedSource::single(parsed))
    }
}

/// Searchable returning a fixed item list
pub struct FixedSearch(pub Vec<SearchItem>);

#[async_trait]
impl Searchable for FixedSearch {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<SearchItem>, ProviderError> {
        Ok(self.0.iter().take(limit).cloned().collect())
    }
}

/// Browsable returning a fixed page for any path
pub struct FixedMenu(pub MenuPage);

#[async_trait]
impl Browsable for FixedMenu {
    async fn menu(&self, _path: &str) -> Result<MenuPage, ProviderError> {
        Ok(self.0.clone())
    }
}

/// VariantListable returning a fixed list
pub struct FixedVariants(pub Vec<Variant>);

#[async_trait]
impl VariantListable for FixedVariants {
    async fn variants(&self, _external_id: &str) -> Result<Vec<Variant>, ProviderError> {
        Ok(self.0.clone())
    }
}

/// StatusCapable returning a fixed status
pub struct FixedStatus(pub ProviderStatus);

#[async_trait]
impl StatusCapable for FixedStatus {
    async fn status(&self) -> Result<ProviderStatus, ProviderError> {
        Ok(self.0.clone())
    }
}
