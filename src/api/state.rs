//! Application state for the API server

use crate::orchestrator::MediaDownloader;
use std::sync::Arc;

use super::rate_limit::InsertLimiter;

/// Shared application state accessible to all route handlers
///
/// Cloned per request (cheap Arc clones); provides the orchestrator facade
/// and the per-user insert rate limiter.
#[derive(Clone)]
pub struct AppState {
    /// The orchestration facade
    pub downloader: Arc<MediaDownloader>,

    /// Per-user insert rate limiter for queue and bulk submissions
    pub insert_limiter: Arc<InsertLimiter>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(downloader: Arc<MediaDownloader>) -> Self {
        let limiter = Arc::new(InsertLimiter::new(
            downloader.get_config().app.insert_rate_limit_per_minute,
            downloader.get_config().app.insert_burst,
        ));
        Self {
            downloader,
            insert_limiter: limiter,
        }
    }
}
