//! Provider registry: durable CRUD for installed providers, priority
//! ordering, enable/disable, and the derived indices the aggregator
//! consults.

use std::collections::HashMap;
use std::sync::Arc;

use addon_client::{ClientConfig, MediaType, ProtocolClient, ResourceKind};
use chrono::Utc;
use tokio::sync::RwLock;

use crate::cache::ResponseCache;
use crate::error::RegistryError;
use crate::health::HealthTracker;
use crate::models::{order_providers, Provider};
use crate::persistence::ProviderStore;

/// Durable CRUD over installed providers.
///
/// Reads take a snapshot of the in-memory map under a shared lock; writes
/// are serialised under the same lock's write half, matching spec §5's
/// "shared read-heavy, write-rare ... writes are serialised under a
/// registry-wide lock". The in-memory map is the source of truth for
/// request-path reads; `store` is where it is made durable.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Provider>>,
    store: Arc<dyn ProviderStore>,
    cache: Arc<ResponseCache>,
    health: Arc<HealthTracker>,
    client_config: ClientConfig,
    default_enabled: bool,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new(
        store: Arc<dyn ProviderStore>,
        cache: Arc<ResponseCache>,
        health: Arc<HealthTracker>,
        client_config: ClientConfig,
        default_enabled: bool,
    ) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            store,
            cache,
            health,
            client_config,
            default_enabled,
        }
    }

    /// Hydrate the in-memory map from durable storage. Call once at startup.
    pub async fn load(&self) -> Result<(), RegistryError> {
        let providers = self.store.list().await?;
        let mut guard = self.providers.write().await;
        for provider in providers {
            guard.insert(provider.id.clone(), provider);
        }
        Ok(())
    }

    /// `install(base_url)`: fetch and validate the manifest,
    /// reject a duplicate id, persist, and add to the live index.
    ///
    /// `base_url` may be a bare base or a full `.../manifest.json` URL;
    /// [`ProtocolClient::new`] normalises it (SPEC_FULL.md §2).
    pub async fn install(&self, base_url: &str) -> Result<Provider, RegistryError> {
        let client = ProtocolClient::new(base_url, self.client_config.clone())?;
        let manifest = client.fetch_manifest().await?;

        {
            let guard = self.providers.read().await;
            if guard.contains_key(&manifest.id) {
                return Err(RegistryError::AlreadyInstalled(manifest.id));
            }
        }

        let provider = Provider {
            id: manifest.id.clone(),
            base_url: client.base_url().to_string(),
            manifest,
            enabled: self.default_enabled,
            priority: 0,
            installed_at: Utc::now(),
        };

        self.store.insert(&provider).await?;
        self.providers.write().await.insert(provider.id.clone(), provider.clone());
        tracing::info!(provider_id = %provider.id, "provider installed");
        Ok(provider)
    }

    /// `uninstall(id)`: remove the row, purge the cache
    /// partition, and clear health history.
    pub async fn uninstall(&self, id: &str) -> Result<(), RegistryError> {
        {
            let guard = self.providers.read().await;
            if !guard.contains_key(id) {
                return Err(RegistryError::NotFound(id.to_string()));
            }
        }
        self.store.delete(id).await?;
        self.providers.write().await.remove(id);
        self.cache.invalidate_provider(id).await;
        self.health.clear(id);
        tracing::info!(provider_id = id, "provider uninstalled");
        Ok(())
    }

    /// `set_enabled(id, bool)`. Toggling invalidates the
    /// provider's cache partition per spec §4.3 ("used on ... enable
    /// toggle").
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), RegistryError> {
        let updated = {
            let mut guard = self.providers.write().await;
            let provider =
                guard.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            provider.enabled = enabled;
            provider.clone()
        };
        self.store.update(&updated).await?;
        self.cache.invalidate_provider(id).await;
        tracing::info!(provider_id = id, enabled, "provider enabled state changed");
        Ok(())
    }

    /// `set_priority(id, int)`.
    pub async fn set_priority(&self, id: &str, priority: i32) -> Result<(), RegistryError> {
        let updated = {
            let mut guard = self.providers.write().await;
            let provider =
                guard.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            provider.priority = priority;
            provider.clone()
        };
        self.store.update(&updated).await?;
        Ok(())
    }

    /// `list(enabled_only?)`: priority DESC, install-time ASC.
    pub async fn list(&self, enabled_only: bool) -> Vec<Provider> {
        let guard = self.providers.read().await;
        let filtered: Vec<Provider> =
            guard.values().filter(|p| !enabled_only || p.enabled).cloned().collect();
        order_providers(filtered)
    }

    #[must_use]
    pub async fn get(&self, id: &str) -> Option<Provider> {
        self.providers.read().await.get(id).cloned()
    }

    /// `refresh_manifest(id)`: on validation failure the old
    /// manifest is retained. Achieved by only writing back on success — the
    /// fetch-and-validate happens entirely before any mutation.
    pub async fn refresh_manifest(&self, id: &str) -> Result<Provider, RegistryError> {
        let base_url = {
            let guard = self.providers.read().await;
            guard.get(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?.base_url.clone()
        };

        let client = ProtocolClient::new(base_url, self.client_config.clone())?;
        let manifest = client.fetch_manifest().await?;

        let updated = {
            let mut guard = self.providers.write().await;
            let provider =
                guard.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            provider.manifest = manifest;
            provider.clone()
        };
        self.store.update(&updated).await?;
        tracing::info!(provider_id = id, "manifest refreshed");
        Ok(updated)
    }

    /// `find_catalog_providers(media_type, catalog_id)`: used by
    /// the aggregator's catalog eligibility filter.
    pub async fn find_catalog_providers(
        &self,
        media_type: &MediaType,
        catalog_id: &str,
    ) -> Vec<Provider> {
        let guard = self.providers.read().await;
        guard
            .values()
            .filter(|p| p.enabled && p.supports_catalog(media_type, catalog_id))
            .cloned()
            .collect()
    }

    /// `find_providers_by_resource(resource_kind)`: the eligible
    /// subset for spec §4.5's filter, sans the catalog-specific check.
    pub async fn find_providers_by_resource(&self, kind: &ResourceKind) -> Vec<Provider> {
        let guard = self.providers.read().await;
        guard
            .values()
            .filter(|p| p.enabled && !p.base_url.is_empty() && p.supports_resource(kind))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTtls;
    use crate::error::PersistenceError;
    use addon_client::{BehaviorHints, CatalogDescriptor, Manifest};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct InMemoryProviderStore {
        rows: Mutex<HashMap<String, Provider>>,
    }

    #[async_trait]
    impl ProviderStore for InMemoryProviderStore {
        async fn insert(&self, provider: &Provider) -> Result<(), PersistenceError> {
            let mut rows = self.rows.lock();
            if rows.contains_key(&provider.id) {
                return Err(PersistenceError::AlreadyExists(provider.id.clone()));
            }
            rows.insert(provider.id.clone(), provider.clone());
            Ok(())
        }

        async fn update(&self, provider: &Provider) -> Result<(), PersistenceError> {
            self.rows.lock().insert(provider.id.clone(), provider.clone());
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<(), PersistenceError> {
            self.rows.lock().remove(id);
            Ok(())
        }

        async fn get(&self, id: &str) -> Result<Option<Provider>, PersistenceError> {
            Ok(self.rows.lock().get(id).cloned())
        }

        async fn list(&self) -> Result<Vec<Provider>, PersistenceError> {
            Ok(self.rows.lock().values().cloned().collect())
        }
    }

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new(
            Arc::new(InMemoryProviderStore::default()),
            Arc::new(ResponseCache::new(CacheTtls::default())),
            Arc::new(HealthTracker::new(200, std::time::Duration::from_secs(604_800))),
            ClientConfig::default(),
            true,
        )
    }

    fn direct_provider(id: &str, priority: i32) -> Provider {
        Provider {
            id: id.to_string(),
            base_url: "https://example.invalid".to_string(),
            manifest: Manifest {
                id: id.to_string(),
                name: id.to_string(),
                version: "1.0.0".to_string(),
                description: String::new(),
                author: None,
                types: vec![MediaType::Movie],
                catalogs: vec![CatalogDescriptor {
                    media_type: MediaType::Movie,
                    id: "top".to_string(),
                    name: "Popular".to_string(),
                    extra: vec![],
                }],
                resources: vec![ResourceKind::Catalog, ResourceKind::Stream],
                id_prefixes: vec![],
                behavior_hints: BehaviorHints::default(),
            },
            enabled: true,
            priority,
            installed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn list_orders_by_priority_desc() {
        let registry = registry();
        registry.providers.write().await.insert("low".to_string(), direct_provider("low", 0));
        registry.providers.write().await.insert("high".to_string(), direct_provider("high", 5));

        let all = registry.list(false).await;
        assert_eq!(all[0].id, "high");
        assert_eq!(all[1].id, "low");
    }

    #[tokio::test]
    async fn list_enabled_only_filters_disabled_providers() {
        let registry = registry();
        let mut disabled = direct_provider("off", 0);
        disabled.enabled = false;
        registry.providers.write().await.insert("off".to_string(), disabled);
        registry.providers.write().await.insert("on".to_string(), direct_provider("on", 0));

        let enabled = registry.list(true).await;
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "on");
    }

    #[tokio::test]
    async fn find_catalog_providers_matches_declared_catalogs() {
        let registry = registry();
        registry.providers.write().await.insert("a".to_string(), direct_provider("a", 0));

        let matches = registry.find_catalog_providers(&MediaType::Movie, "top").await;
        assert_eq!(matches.len(), 1);
        let no_match = registry.find_catalog_providers(&MediaType::Series, "top").await;
        assert!(no_match.is_empty());
    }

    #[tokio::test]
    async fn find_providers_by_resource_excludes_providers_missing_it() {
        let registry = registry();
        registry.providers.write().await.insert("a".to_string(), direct_provider("a", 0));

        let stream_providers = registry.find_providers_by_resource(&ResourceKind::Stream).await;
        assert_eq!(stream_providers.len(), 1);
        let meta_providers = registry.find_providers_by_resource(&ResourceKind::Meta).await;
        assert!(meta_providers.is_empty());
    }

    #[tokio::test]
    async fn uninstall_unknown_provider_is_not_found() {
        let registry = registry();
        let err = registry.uninstall("missing").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn set_enabled_persists_and_updates_live_index() {
        let registry = registry();
        registry.providers.write().await.insert("a".to_string(), direct_provider("a", 0));

        registry.set_enabled("a", false).await.unwrap();
        let provider = registry.get("a").await.unwrap();
        assert!(!provider.enabled);
    }
}
