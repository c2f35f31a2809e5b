//! # media-dl
//!
//! Backend library for multi-user media download applications: a persistent
//! job queue, an admission scheduler that binds jobs to an external
//! transfer daemon, a progress worker that files completed downloads into a
//! media library, an event stream for clients, and a provider coordination
//! layer (pausing, backoff, bulk resolution, catalog caching).
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to job lifecycle events
//! - **Pluggable** - Catalog providers implement capability traits; the
//!   transfer daemon sits behind an RPC client trait
//! - **Crash-safe** - All state lives in the store; restarts reconcile
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use media_dl::{Config, MediaDownloader, PlainVault, ProviderHandle};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!
//!     // Providers plug in through a factory building capability handles
//!     let factory: media_dl::ProviderFactory =
//!         Arc::new(|row, _creds| Ok(ProviderHandle::new(row.id, &row.key)));
//!
//!     let downloader = Arc::new(
//!         MediaDownloader::new(config, Arc::new(PlainVault), factory).await?,
//!     );
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     // Background loops + REST API
//!     downloader.start();
//!     downloader.spawn_api_server();
//!
//!     run_with_shutdown(&downloader).await;
//!     Ok(())
//! }
//! # use media_dl::run_with_shutdown;
//! ```
//!
//! ## Exit codes
//!
//! Embedding binaries conventionally map startup failures through
//! [`Error::startup_exit_code`]: 0 clean shutdown, 1 invalid configuration,
//! 2 store unreachable, 3 transfer daemon unreachable after the startup
//! grace.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Bulk resolution of batch submissions
pub mod bulk;
/// Catalog cache (menu pages and stream variants)
pub mod catalog;
/// Configuration types
pub mod config;
/// Provider pause, backoff, and status coordination
pub mod coordination;
/// Database persistence layer
pub mod db;
/// Transfer daemon RPC client
pub mod downloader;
/// Error types
pub mod error;
/// Event bus
pub mod events;
/// Library naming templates
pub mod library;
/// Media server refresh client
pub mod media_server;
/// The orchestration facade
pub mod orchestrator;
/// Provider capability traits and registry
pub mod providers;
/// Retry logic with exponential backoff
pub mod retry;
/// Admission scheduler
pub mod scheduler;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Progress worker and finalization
pub mod worker;

#[allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]
#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{ApiError, Error, ErrorDetail, Result, ToHttpStatus};
pub use events::EventBus;
pub use orchestrator::MediaDownloader;
pub use providers::{
    Browsable, KeyVault, PlainVault, ProviderFactory, ProviderHandle, Registry, Resolvable,
    Searchable, StatusCapable, VariantListable,
};
pub use types::{
    BulkItem, BulkTaskInfo, BulkTaskStatus, Category, Event, Identity, JobId, JobInfo, JobStatus,
    QueueItem, QueueStats, Role,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then begins the downloader's
/// shutdown: the scheduler stops claiming, the worker finishes its
/// in-flight cycle, the bulk resolver finishes its current item, and event
/// subscribers receive a final `shutdown` event.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(downloader: &MediaDownloader) {
    wait_for_signal().await;
    downloader.begin_shutdown();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
