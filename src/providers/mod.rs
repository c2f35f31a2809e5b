//! Provider capabilities and the registry.
//!
//! Concrete catalog providers live outside this crate; they plug in through
//! the capability traits here. The scheduler only strictly needs
//! [`Resolvable`]; everything else enriches search, browsing, and status
//! reporting. A provider implements whichever subset it can and exposes it
//! through a [`ProviderHandle`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;
use utoipa::ToSchema;

use crate::error::ProviderError;

mod registry;

pub use registry::{KeyVault, PlainVault, ProviderFactory, Registry};

/// One search result from a provider
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchItem {
    /// Provider-scoped item key
    pub external_id: String,

    /// Display title
    pub title: String,

    /// Size in bytes, when the provider reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    /// Short description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Provider-specific extras
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Kind of a menu entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MenuItemKind {
    /// A navigable sub-menu
    Dir,
    /// A downloadable item
    File,
}

/// One entry of a provider menu page
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MenuItem {
    /// Entry kind
    #[serde(rename = "type")]
    pub kind: MenuItemKind,

    /// Display label
    pub label: String,

    /// Path to pass back to `menu` for Dir entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Item key for File entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Short description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Provider-specific extras
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// One page of a provider's browse hierarchy
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MenuPage {
    /// Page title
    pub title: String,

    /// Entries on this page
    pub items: Vec<MenuItem>,
}

/// One stream variant of a catalog item
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Variant {
    /// Variant identifier, usable as an external id for queueing
    pub id: String,

    /// Quality label ("1080p", "4K HDR", ...)
    pub quality: String,

    /// Size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    /// Video bitrate in kbps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<u32>,

    /// Duration in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,

    /// Audio codec name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
}

/// Authentication status of a provider account
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProviderStatus {
    /// Whether the stored credentials currently work
    pub authenticated: bool,

    /// Days of subscription left, when the provider reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_left: Option<i64>,

    /// Free-form status message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Direct download location(s) for an item.
///
/// The first URL is the one handed to the daemon; alternates are kept in
/// job metadata for future use.
#[derive(Clone, Debug)]
pub struct ResolvedSource {
    urls: Vec<Url>,
}

impl ResolvedSource {
    /// Build from a non-empty URL list
    pub fn new(urls: Vec<Url>) -> Result<Self, ProviderError> {
        if urls.is_empty() {
            return Err(ProviderError::Protocol(
                "resolution returned no URLs".into(),
            ));
        }
        Ok(Self { urls })
    }

    /// Build from a single URL
    pub fn single(url: Url) -> Self {
        Self { urls: vec![url] }
    }

    /// The URL handed to the daemon
    pub fn primary(&self) -> &Url {
        &self.urls[0]
    }

    /// Remaining URLs, stored as alternates
    pub fn alternates(&self) -> &[Url] {
        &self.urls[1..]
    }
}

/// Full-text catalog search
#[async_trait]
pub trait Searchable: Send + Sync {
    /// Search the provider's catalog
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchItem>, ProviderError>;
}

/// Hierarchical catalog browsing
#[async_trait]
pub trait Browsable: Send + Sync {
    /// Fetch one menu page; "/" is the root
    async fn menu(&self, path: &str) -> Result<MenuPage, ProviderError>;
}

/// Stream variant listing for an item
#[async_trait]
pub trait VariantListable: Send + Sync {
    /// List the variants of an item
    async fn variants(&self, external_id: &str) -> Result<Vec<Variant>, ProviderError>;
}

/// Direct URL resolution, the one capability admission requires
#[async_trait]
pub trait Resolvable: Send + Sync {
    /// Resolve an item to its direct download URL(s)
    async fn resolve_download_url(
        &self,
        external_id: &str,
    ) -> Result<ResolvedSource, ProviderError>;
}

/// Account status reporting
#[async_trait]
pub trait StatusCapable: Send + Sync {
    /// Query the provider account status
    async fn status(&self) -> Result<ProviderStatus, ProviderError>;
}

/// A configured provider and the capabilities it implements
pub struct ProviderHandle {
    /// Provider row id
    pub id: i64,
    /// Unique provider key
    pub key: String,
    search: Option<Arc<dyn Searchable>>,
    browse: Option<Arc<dyn Browsable>>,
    variants: Option<Arc<dyn VariantListable>>,
    resolve: Option<Arc<dyn Resolvable>>,
    status: Option<Arc<dyn StatusCapable>>,
}

impl ProviderHandle {
    /// Start a handle with no capabilities
    pub fn new(id: i64, key: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            search: None,
            browse: None,
            variants: None,
            resolve: None,
            status: None,
        }
    }

    /// Attach search
    pub fn with_search(mut self, cap: Arc<dyn Searchable>) -> Self {
        self.search = Some(cap);
        self
    }

    /// Attach browsing
    pub fn with_browse(mut self, cap: Arc<dyn Browsable>) -> Self {
        self.browse = Some(cap);
        self
    }

    /// Attach variant listing
    pub fn with_variants(mut self, cap: Arc<dyn VariantListable>) -> Self {
        self.variants = Some(cap);
        self
    }

    /// Attach URL resolution
    pub fn with_resolve(mut self, cap: Arc<dyn Resolvable>) -> Self {
        self.resolve = Some(cap);
        self
    }

    /// Attach status reporting
    pub fn with_status(mut self, cap: Arc<dyn StatusCapable>) -> Self {
        self.status = Some(cap);
        self
    }

    /// Search capability, if implemented
    pub fn searchable(&self) -> Option<&dyn Searchable> {
        self.search.as_deref()
    }

    /// Browse capability, if implemented
    pub fn browsable(&self) -> Option<&dyn Browsable> {
        self.browse.as_deref()
    }

    /// Variant listing capability, if implemented
    pub fn variant_listable(&self) -> Option<&dyn VariantListable> {
        self.variants.as_deref()
    }

    /// Resolution capability, if implemented
    pub fn resolvable(&self) -> Option<&dyn Resolvable> {
        self.resolve.as_deref()
    }

    /// Status capability, if implemented
    pub fn status_capable(&self) -> Option<&dyn StatusCapable> {
        self.status.as_deref()
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("search", &self.search.is_some())
            .field("browse", &self.browse.is_some())
            .field("variants", &self.variants.is_some())
            .field("resolve", &self.resolve.is_some())
            .field("status", &self.status.is_some())
            .finish()
    }
}
