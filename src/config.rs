//! Configuration types for media-dl

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

use crate::error::{Error, Result};

/// Queue admission behavior (concurrency, free-space floor, search defaults)
///
/// Groups settings related to how jobs are admitted and listed.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AppConfig {
    /// Maximum jobs in `starting` or `downloading` at once (default: 3)
    #[serde(default = "default_max_active")]
    pub max_active_downloads: usize,

    /// Minimum free space on the downloads mount before admission stops,
    /// in gigabytes (default: 1.0; 0 disables the check)
    #[serde(default = "default_min_free_space_gb")]
    pub min_free_space_gb: f64,

    /// Default result limit for provider searches (default: 25)
    #[serde(default = "default_search_limit")]
    pub default_search_limit: usize,

    /// Per-user insert rate limit in requests per minute
    /// (None = effectively unlimited, the default)
    #[serde(default)]
    pub insert_rate_limit_per_minute: Option<u32>,

    /// Burst size for the insert rate limiter (default: 10)
    #[serde(default = "default_insert_burst")]
    pub insert_burst: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_active_downloads: default_max_active(),
            min_free_space_gb: default_min_free_space_gb(),
            default_search_limit: default_search_limit(),
            insert_rate_limit_per_minute: None,
            insert_burst: default_insert_burst(),
        }
    }
}

/// Transfer daemon connection settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloaderConfig {
    /// JSON-RPC endpoint of the transfer daemon
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Shared secret sent as the RPC token parameter
    #[serde(default)]
    pub secret: Option<String>,

    /// Global download speed cap in MB/s (0 disables, the default)
    #[serde(default)]
    pub max_speed_mb_s: f64,

    /// Timeout for mutating RPC calls (default: 30 seconds)
    #[serde(default = "default_rpc_timeout", with = "duration_secs")]
    pub request_timeout: Duration,

    /// Timeout for status polls (default: 5 seconds)
    #[serde(default = "default_status_timeout", with = "duration_secs")]
    pub status_timeout: Duration,

    /// Reachability probes attempted at startup before giving up (default: 3)
    #[serde(default = "default_startup_probes")]
    pub startup_probes: u32,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            secret: None,
            max_speed_mb_s: 0.0,
            request_timeout: default_rpc_timeout(),
            status_timeout: default_status_timeout(),
            startup_probes: default_startup_probes(),
        }
    }
}

impl DownloaderConfig {
    /// Global speed cap in bytes per second, None when disabled
    pub fn max_speed_bps(&self) -> Option<u64> {
        if self.max_speed_mb_s > 0.0 {
            Some((self.max_speed_mb_s * 1_000_000.0) as u64)
        } else {
            None
        }
    }
}

/// Filesystem layout
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PathsConfig {
    /// Where in-flight transfers land (default: "./downloads")
    #[serde(default = "default_downloads_path")]
    pub downloads: PathBuf,

    /// Root of the media library (default: "./library")
    #[serde(default = "default_library_path")]
    pub library: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            downloads: default_downloads_path(),
            library: default_library_path(),
        }
    }
}

/// Media server refresh endpoint
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MediaServerConfig {
    /// Base URL of the media server
    pub url: String,

    /// API key sent with refresh requests
    pub api_key: String,

    /// Library section to refresh (server-wide refresh when absent)
    #[serde(default)]
    pub library_id: Option<String>,
}

/// Per-provider tuning knobs. Credentials live in the store, encrypted;
/// only operational settings are configured here.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProviderSettings {
    /// Minimum interval between successive URL resolutions (default: 2 s)
    #[serde(default = "default_spacing_secs")]
    pub download_spacing_seconds: u64,

    /// Menu cache TTL (default: 172800 s, two days)
    #[serde(default = "default_menu_ttl")]
    pub menu_cache_ttl_seconds: u64,

    /// Variants cache TTL (default: 3600 s)
    #[serde(default = "default_variants_ttl")]
    pub variants_cache_ttl_seconds: u64,

    /// Initial transient-error backoff window (default: 60 s)
    #[serde(default = "default_backoff_secs")]
    pub error_backoff_seconds: u64,

    /// Backoff window cap after repeated failures (default: 900 s)
    #[serde(default = "default_backoff_cap_secs")]
    pub error_backoff_cap_seconds: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            download_spacing_seconds: default_spacing_secs(),
            menu_cache_ttl_seconds: default_menu_ttl(),
            variants_cache_ttl_seconds: default_variants_ttl(),
            error_backoff_seconds: default_backoff_secs(),
            error_backoff_cap_seconds: default_backoff_cap_secs(),
        }
    }
}

/// Persistent store connection
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StoreConfig {
    /// SQLite DSN: a file path or "sqlite::memory:" (default: "./media-dl.db")
    #[serde(default = "default_dsn")]
    pub dsn: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dsn: default_dsn(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 500 ms)
    #[serde(default = "default_initial_delay", with = "duration_millis")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// REST API server settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiServerConfig {
    /// Bind address (default: 127.0.0.1:8390)
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Serve the interactive Swagger UI (default: false)
    #[serde(default)]
    pub swagger_ui: bool,

    /// Allowed CORS origins (empty = same-origin only)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            swagger_ui: false,
            cors_origins: Vec::new(),
        }
    }
}

/// Main configuration for media-dl
///
/// Fields are organized into logical sub-configs:
/// - [`app`](AppConfig) — admission and listing behavior
/// - [`downloader`](DownloaderConfig) — transfer daemon RPC
/// - [`paths`](PathsConfig) — downloads and library directories
/// - [`media_server`](MediaServerConfig) — library refresh endpoint
/// - [`providers`](ProviderSettings) — per-provider tuning, keyed by provider key
/// - [`store`](StoreConfig) — persistent store DSN
/// - [`retry`](RetryConfig) — transient-failure retry policy
/// - [`server`](ApiServerConfig) — REST API server
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Admission and listing behavior
    #[serde(default)]
    pub app: AppConfig,

    /// Transfer daemon RPC settings
    #[serde(default)]
    pub downloader: DownloaderConfig,

    /// Filesystem layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Media server refresh endpoint (refresh skipped when absent)
    #[serde(default)]
    pub media_server: Option<MediaServerConfig>,

    /// Per-provider tuning, keyed by provider key
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,

    /// Persistent store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// REST API server settings
    #[serde(default)]
    pub server: ApiServerConfig,
}

impl Config {
    /// Tuning knobs for a provider, falling back to defaults for keys
    /// without an explicit entry.
    pub fn provider_settings(&self, key: &str) -> ProviderSettings {
        self.providers.get(key).cloned().unwrap_or_default()
    }

    /// Free-space floor in bytes
    pub fn min_free_space_bytes(&self) -> u64 {
        (self.app.min_free_space_gb * 1_000_000_000.0) as u64
    }

    /// Validate the configuration, returning the first offending key.
    ///
    /// Startup maps a validation failure to exit code 1.
    pub fn validate(&self) -> Result<()> {
        if self.app.max_active_downloads < 1 {
            return Err(Error::Config {
                message: "max_active_downloads must be at least 1".into(),
                key: Some("app.max_active_downloads".into()),
            });
        }
        if self.app.min_free_space_gb < 0.0 || !self.app.min_free_space_gb.is_finite() {
            return Err(Error::Config {
                message: "min_free_space_gb must be a finite value >= 0".into(),
                key: Some("app.min_free_space_gb".into()),
            });
        }
        if self.app.default_search_limit == 0 {
            return Err(Error::Config {
                message: "default_search_limit must be at least 1".into(),
                key: Some("app.default_search_limit".into()),
            });
        }
        if url::Url::parse(&self.downloader.rpc_url).is_err() {
            return Err(Error::Config {
                message: format!("invalid downloader RPC URL: {}", self.downloader.rpc_url),
                key: Some("downloader.rpc_url".into()),
            });
        }
        if self.downloader.max_speed_mb_s < 0.0 {
            return Err(Error::Config {
                message: "max_speed_mb_s must be >= 0 (0 disables the cap)".into(),
                key: Some("downloader.max_speed_mb_s".into()),
            });
        }
        if self.paths.downloads.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "downloads path must not be empty".into(),
                key: Some("paths.downloads".into()),
            });
        }
        if self.paths.library.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "library path must not be empty".into(),
                key: Some("paths.library".into()),
            });
        }
        if self.store.dsn.is_empty() {
            return Err(Error::Config {
                message: "store DSN must not be empty".into(),
                key: Some("store.dsn".into()),
            });
        }
        if let Some(ms) = &self.media_server {
            if url::Url::parse(&ms.url).is_err() {
                return Err(Error::Config {
                    message: format!("invalid media server URL: {}", ms.url),
                    key: Some("media_server.url".into()),
                });
            }
        }
        for (key, settings) in &self.providers {
            if settings.error_backoff_seconds == 0 {
                return Err(Error::Config {
                    message: "error_backoff_seconds must be at least 1".into(),
                    key: Some(format!("providers.{key}.error_backoff_seconds")),
                });
            }
            if settings.error_backoff_cap_seconds < settings.error_backoff_seconds {
                return Err(Error::Config {
                    message: "error_backoff_cap_seconds must be >= error_backoff_seconds".into(),
                    key: Some(format!("providers.{key}.error_backoff_cap_seconds")),
                });
            }
        }
        Ok(())
    }
}

fn default_max_active() -> usize {
    3
}

fn default_min_free_space_gb() -> f64 {
    1.0
}

fn default_search_limit() -> usize {
    25
}

fn default_insert_burst() -> u32 {
    10
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:6800/jsonrpc".to_string()
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_status_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_startup_probes() -> u32 {
    3
}

fn default_downloads_path() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_library_path() -> PathBuf {
    PathBuf::from("./library")
}

fn default_spacing_secs() -> u64 {
    2
}

fn default_menu_ttl() -> u64 {
    172_800
}

fn default_variants_ttl() -> u64 {
    3_600
}

fn default_backoff_secs() -> u64 {
    60
}

fn default_backoff_cap_secs() -> u64 {
    900
}

fn default_dsn() -> String {
    "./media-dl.db".to_string()
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_bind() -> SocketAddr {
    use std::net::{IpAddr, Ipv4Addr};
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8390)
}

/// Serialize Durations as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serialize Durations as whole milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config
            .validate()
            .expect("the zero-configuration default must pass validation");
    }

    #[test]
    fn default_config_deserializes_from_empty_json() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.app.max_active_downloads, 3);
        assert_eq!(config.app.default_search_limit, 25);
        assert!(config.app.insert_rate_limit_per_minute.is_none());
        assert_eq!(config.downloader.rpc_url, "http://127.0.0.1:6800/jsonrpc");
        assert_eq!(config.downloader.status_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_max_active_is_rejected() {
        let config = Config {
            app: AppConfig {
                max_active_downloads: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.startup_exit_code(), 1, "config errors map to exit 1");
    }

    #[test]
    fn negative_free_space_is_rejected() {
        let config = Config {
            app: AppConfig {
                min_free_space_gb: -1.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_rpc_url_is_rejected_with_its_key() {
        let config = Config {
            downloader: DownloaderConfig {
                rpc_url: "not a url".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        match config.validate().unwrap_err() {
            crate::error::Error::Config { key, .. } => {
                assert_eq!(key.as_deref(), Some("downloader.rpc_url"));
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn backoff_cap_below_base_is_rejected() {
        let mut config = Config::default();
        config.providers.insert(
            "webshare".into(),
            ProviderSettings {
                error_backoff_seconds: 120,
                error_backoff_cap_seconds: 60,
                ..Default::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(
            err.to_string().contains("error_backoff_cap_seconds"),
            "error should name the offending key, got: {err}"
        );
    }

    #[test]
    fn provider_settings_fall_back_to_defaults() {
        let config = Config::default();
        let settings = config.provider_settings("unconfigured");
        assert_eq!(settings.download_spacing_seconds, 2);
        assert_eq!(settings.error_backoff_seconds, 60);
        assert_eq!(settings.error_backoff_cap_seconds, 900);
        assert_eq!(settings.menu_cache_ttl_seconds, 172_800);
    }

    #[test]
    fn explicit_provider_settings_win_over_defaults() {
        let mut config = Config::default();
        config.providers.insert(
            "kraska".into(),
            ProviderSettings {
                download_spacing_seconds: 10,
                ..Default::default()
            },
        );
        assert_eq!(config.provider_settings("kraska").download_spacing_seconds, 10);
        assert_eq!(config.provider_settings("other").download_spacing_seconds, 2);
    }

    #[test]
    fn max_speed_zero_disables_the_cap() {
        let config = Config::default();
        assert_eq!(config.downloader.max_speed_bps(), None);

        let capped = DownloaderConfig {
            max_speed_mb_s: 2.5,
            ..Default::default()
        };
        assert_eq!(capped.max_speed_bps(), Some(2_500_000));
    }

    #[test]
    fn min_free_space_converts_to_bytes() {
        let config = Config {
            app: AppConfig {
                min_free_space_gb: 2.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.min_free_space_bytes(), 2_000_000_000);
    }

    #[test]
    fn retry_config_round_trips_through_json() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.5,
            jitter: false,
        };
        let json = serde_json::to_string(&retry).unwrap();
        let back: RetryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_attempts, 5);
        assert_eq!(back.initial_delay, Duration::from_millis(250));
        assert_eq!(back.max_delay, Duration::from_secs(30));
        assert!(!back.jitter);
    }
}
