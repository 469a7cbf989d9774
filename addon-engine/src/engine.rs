//! Engine facade: the single entry point upper layers talk to.
//!
//! Wires the registry, cache, health tracker, and aggregator together and
//! exposes one operation per spec §4.7 bullet, each returning a typed
//! [`EngineError`] rather than letting a collaborator's error leak raw.

use std::collections::HashMap;
use std::sync::Arc;

use addon_client::MediaType;

use crate::aggregator::Aggregator;
use crate::cache::ResponseCache;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::health::HealthTracker;
use crate::models::{
    AggregatedCatalog, AggregatedMeta, AggregatedStreams, AggregatedSubtitles, CacheStats,
    CatalogInfo, HealthSummary, Provider,
};
use crate::persistence::ProviderStore;
use crate::registry::ProviderRegistry;

/// The facade upper layers (UI, CLI, whatever embeds this crate) are meant
/// to hold one of.
pub struct Engine {
    registry: Arc<ProviderRegistry>,
    cache: Arc<ResponseCache>,
    health: Arc<HealthTracker>,
    aggregator: Arc<Aggregator>,
}

impl Engine {
    /// Wire every collaborator from `config` and hydrate the registry from
    /// `provider_store`. Call once at process start.
    pub async fn bootstrap(
        config: EngineConfig,
        provider_store: Arc<dyn ProviderStore>,
    ) -> Result<Self, EngineError> {
        let cache = Arc::new(ResponseCache::new(config.cache_ttls()));
        let health =
            Arc::new(HealthTracker::new(config.health.window_size, config.health_window_duration()));
        let client_config = config.client_config();

        let registry = Arc::new(ProviderRegistry::new(
            provider_store,
            Arc::clone(&cache),
            Arc::clone(&health),
            client_config.clone(),
            config.install.default_enabled,
        ));
        registry.load().await.map_err(EngineError::from)?;

        let aggregator = Arc::new(Aggregator::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&health),
            client_config,
            config.aggregate_deadline(),
        ));

        Ok(Self { registry, cache, health, aggregator })
    }

    /// `list_catalogs(media_type) -> list<CatalogInfo>`: every
    /// catalog any enabled provider declares for `media_type`.
    pub async fn list_catalogs(&self, media_type: &MediaType) -> Vec<CatalogInfo> {
        let providers = self.registry.list(true).await;
        let mut out = Vec::new();
        for provider in &providers {
            for catalog in &provider.manifest.catalogs {
                if &catalog.media_type != media_type {
                    continue;
                }
                let genres = catalog
                    .extra
                    .iter()
                    .find(|e| e.name == "genre")
                    .map(|e| e.options.clone())
                    .unwrap_or_default();
                let supported_extras = catalog.extra.iter().map(|e| e.name.clone()).collect();
                out.push(CatalogInfo {
                    provider_id: provider.id.clone(),
                    provider_name: provider.name().to_string(),
                    catalog_id: catalog.id.clone(),
                    catalog_name: catalog.name.clone(),
                    media_type: catalog.media_type.clone(),
                    genres,
                    supported_extras,
                });
            }
        }
        out
    }

    /// `aggregate_catalog(media_type, catalog_id, extras) -> AggregatedCatalog`.
    pub async fn aggregate_catalog(
        &self,
        media_type: &MediaType,
        catalog_id: &str,
        extras: &std::collections::BTreeMap<String, String>,
    ) -> Result<AggregatedCatalog, EngineError> {
        Ok(self.aggregator.aggregate_catalog(media_type, catalog_id, extras).await?)
    }

    /// `get_streams(media_type, media_id) -> AggregatedStreams`.
    pub async fn get_streams(
        &self,
        media_type: &MediaType,
        media_id: &str,
    ) -> Result<AggregatedStreams, EngineError> {
        Ok(self.aggregator.aggregate_streams(media_type, media_id).await?)
    }

    /// `get_meta(media_type, media_id) -> AggregatedMeta`.
    pub async fn get_meta(
        &self,
        media_type: &MediaType,
        media_id: &str,
    ) -> Result<AggregatedMeta, EngineError> {
        Ok(self.aggregator.aggregate_meta(media_type, media_id).await?)
    }

    /// `get_subtitles(media_type, media_id) -> AggregatedSubtitles`.
    pub async fn get_subtitles(
        &self,
        media_type: &MediaType,
        media_id: &str,
    ) -> Result<AggregatedSubtitles, EngineError> {
        Ok(self.aggregator.aggregate_subtitles(media_type, media_id).await?)
    }

    /// `install_provider(base_url) -> Provider`.
    pub async fn install_provider(&self, base_url: &str) -> Result<Provider, EngineError> {
        if base_url.trim().is_empty() {
            return Err(EngineError::InvalidInput("base url must not be empty".to_string()));
        }
        Ok(self.registry.install(base_url).await?)
    }

    /// `uninstall_provider(id)`.
    pub async fn uninstall_provider(&self, id: &str) -> Result<(), EngineError> {
        Ok(self.registry.uninstall(id).await?)
    }

    /// `set_enabled(id, bool)`.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), EngineError> {
        Ok(self.registry.set_enabled(id, enabled).await?)
    }

    /// `set_priority(id, int)`.
    pub async fn set_priority(&self, id: &str, priority: i32) -> Result<(), EngineError> {
        Ok(self.registry.set_priority(id, priority).await?)
    }

    /// `refresh_manifest(id) -> Provider`.
    pub async fn refresh_manifest(&self, id: &str) -> Result<Provider, EngineError> {
        Ok(self.registry.refresh_manifest(id).await?)
    }

    /// `list_providers(enabled_only?) -> InstalledProvidersView`.
    pub async fn list_providers(&self, enabled_only: bool) -> Vec<Provider> {
        self.registry.list(enabled_only).await
    }

    /// `health_summaries() -> list<HealthSummary>`, joined with
    /// each provider's display name.
    pub async fn health_summaries(&self) -> Vec<HealthSummary> {
        let providers = self.registry.list(false).await;
        let display_names: HashMap<String, String> =
            providers.iter().map(|p| (p.id.clone(), p.name().to_string())).collect();
        self.health.summaries(&display_names)
    }

    /// `cache_stats() -> CacheStats`.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// `clear_cache()`: drop every cached response regardless of
    /// provider or TTL.
    pub async fn clear_cache(&self) {
        self.cache.clear_all().await;
    }

    /// `clear_expired_cache()`: idempotent sweep.
    pub async fn clear_expired_cache(&self) {
        self.cache.clear_expired().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct InMemoryProviderStore {
        rows: Mutex<HashMap<String, Provider>>,
    }

    #[async_trait]
    impl ProviderStore for InMemoryProviderStore {
        async fn insert(&self, provider: &Provider) -> Result<(), PersistenceError> {
            self.rows.lock().insert(provider.id.clone(), provider.clone());
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

    async fn engine() -> Engine {
        Engine::bootstrap(EngineConfig::default(), Arc::new(InMemoryProviderStore::default()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn bootstrap_yields_an_empty_registry() {
        let engine = engine().await;
        assert!(engine.list_providers(false).await.is_empty());
    }

    #[tokio::test]
    async fn aggregate_catalog_with_no_providers_reports_no_providers() {
        let engine = engine().await;
        let err = engine
            .aggregate_catalog(&MediaType::Movie, "top", &std::collections::BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Aggregate(_)));
    }

    #[tokio::test]
    async fn install_rejects_blank_base_url() {
        let engine = engine().await;
        let err = engine.install_provider("   ").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn clear_cache_resets_stats_accumulators_but_not_entries_total_only() {
        let engine = engine().await;
        engine.clear_cache().await;
        assert_eq!(engine.cache_stats().entries_total, 0);
    }
}
