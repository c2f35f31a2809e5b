//! Provider registry: loads enabled providers, decrypts credentials, and
//! hands out capability-typed handles.
//!
//! Handles are cached across requests; the map is rebuilt on configuration
//! change via [`Registry::reload`]. A provider whose credentials fail to
//! decrypt is demoted to disabled at runtime with an audit record, never a
//! crash.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::db::{Database, ProviderRow};
use crate::error::Result;

use super::ProviderHandle;

/// Decrypts provider credential blobs.
///
/// The concrete vault is injected by the embedding application; tests and
/// development use [`PlainVault`].
pub trait KeyVault: Send + Sync {
    /// Decrypt a credential ciphertext into the plaintext config JSON
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Pass-through vault: ciphertext is the plaintext
pub struct PlainVault;

impl KeyVault for PlainVault {
    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        Ok(ciphertext.to_string())
    }
}

/// Builds a capability handle from a provider row and its decrypted config
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderRow, serde_json::Value) -> Result<ProviderHandle> + Send + Sync>;

/// Cached map of provider handles, keyed by provider key
pub struct Registry {
    inner: RwLock<HashMap<String, Arc<ProviderHandle>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::empty()
    }
}

impl Registry {
    /// An empty registry
    pub fn empty() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// A registry pre-populated with handles (tests, embedded setups)
    pub fn with_handles(handles: Vec<ProviderHandle>) -> Self {
        let map = handles
            .into_iter()
            .map(|h| (h.key.clone(), Arc::new(h)))
            .collect();
        Self {
            inner: RwLock::new(map),
        }
    }

    /// Load enabled providers from the store
    pub async fn load(
        db: &Database,
        vault: &dyn KeyVault,
        factory: &ProviderFactory,
    ) -> Result<Self> {
        let registry = Self::empty();
        registry.reload(db, vault, factory).await?;
        Ok(registry)
    }

    /// Rebuild the handle map from the store.
    ///
    /// Rows whose credentials fail to decrypt, or whose handle construction
    /// fails, are demoted: disabled in the store, audited, and skipped.
    pub async fn reload(
        &self,
        db: &Database,
        vault: &dyn KeyVault,
        factory: &ProviderFactory,
    ) -> Result<()> {
        let rows = db.list_enabled_providers().await?;
        let mut map = HashMap::with_capacity(rows.len());

        for row in rows {
            let config = match decrypt_config(&row, vault) {
                Ok(config) => config,
                Err(e) => {
                    demote(db, &row, "credential decryption failed", &e).await;
                    continue;
                }
            };

            match factory(&row, config) {
                Ok(handle) => {
                    map.insert(row.key.clone(), Arc::new(handle));
                }
                Err(e) => {
                    demote(db, &row, "handle construction failed", &e).await;
                }
            }
        }

        tracing::info!(providers = map.len(), "provider registry loaded");
        *self.inner.write().await = map;
        Ok(())
    }

    /// Handle for a provider key
    pub async fn get(&self, key: &str) -> Option<Arc<ProviderHandle>> {
        self.inner.read().await.get(key).cloned()
    }

    /// All loaded handles
    pub async fn all(&self) -> Vec<Arc<ProviderHandle>> {
        let mut handles: Vec<_> = self.inner.read().await.values().cloned().collect();
        handles.sort_by(|a, b| a.key.cmp(&b.key));
        handles
    }

    /// Keys of all loaded providers
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.inner.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Insert or replace one handle
    pub async fn insert(&self, handle: ProviderHandle) {
        self.inner
            .write()
            .await
            .insert(handle.key.clone(), Arc::new(handle));
    }
}

fn decrypt_config(row: &ProviderRow, vault: &dyn KeyVault) -> Result<serde_json::Value> {
    let Some(ciphertext) = row.config_ciphertext.as_deref() else {
        return Ok(serde_json::json!({}));
    };
    let plaintext = vault.decrypt(ciphertext)?;
    Ok(serde_json::from_str(&plaintext)?)
}

/// Disable a broken provider and leave a trail, but keep loading the rest
async fn demote(db: &Database, row: &ProviderRow, reason: &str, error: &crate::error::Error) {
    tracing::warn!(
        provider = %row.key,
        reason,
        error = %error,
        "demoting provider to disabled"
    );

    if let Err(e) = db.disable_provider(row.id).await {
        tracing::error!(provider = %row.key, error = %e, "failed to disable provider");
    }

    let payload = serde_json::json!({
        "reason": reason,
        "error": error.to_string(),
    });
    if let Err(e) = db
        .insert_audit(
            "system",
            "provider.demoted",
            "provider",
            Some(&row.key),
            Some(&payload),
        )
        .await
    {
        tracing::error!(provider = %row.key, error = %e, "failed to audit demotion");
    }
}
