//! TTL-keyed response cache with provider isolation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use moka::future::Cache;
use moka::Expiry;

use addon_client::MediaType;

use super::singleflight::SingleFlight;
use crate::models::CacheStats;

/// Resource kinds the cache keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Manifest,
    Catalog,
    Stream,
    Meta,
    Subtitles,
}

impl CacheKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CacheKind::Manifest => "manifest",
            CacheKind::Catalog => "catalog",
            CacheKind::Stream => "stream",
            CacheKind::Meta => "meta",
            CacheKind::Subtitles => "subtitles",
        }
    }

    /// Default TTL per spec §3/§6.4, before config overrides.
    #[must_use]
    pub fn default_ttl(self) -> Duration {
        match self {
            CacheKind::Manifest => Duration::from_secs(7 * 24 * 3600),
            CacheKind::Catalog => Duration::from_secs(3600),
            CacheKind::Stream => Duration::from_secs(300),
            CacheKind::Meta => Duration::from_secs(24 * 3600),
            CacheKind::Subtitles => Duration::from_secs(3600),
        }
    }
}

/// Per-kind TTL policy (spec §6.4 `cache.ttl.*`).
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub manifest: Duration,
    pub catalog: Duration,
    pub stream: Duration,
    pub meta: Duration,
    pub subtitles: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            manifest: CacheKind::Manifest.default_ttl(),
            catalog: CacheKind::Catalog.default_ttl(),
            stream: CacheKind::Stream.default_ttl(),
            meta: CacheKind::Meta.default_ttl(),
            subtitles: CacheKind::Subtitles.default_ttl(),
        }
    }
}

impl CacheTtls {
    #[must_use]
    pub fn for_kind(&self, kind: CacheKind) -> Duration {
        match kind {
            CacheKind::Manifest => self.manifest,
            CacheKind::Catalog => self.catalog,
            CacheKind::Stream => self.stream,
            CacheKind::Meta => self.meta,
            CacheKind::Subtitles => self.subtitles,
        }
    }
}

/// The composite cache key from spec §3: `{kind, provider, media type, id,
/// extras fingerprint}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: CacheKind,
    pub provider_id: String,
    pub media_type: Option<MediaType>,
    pub id: String,
    pub extras_fingerprint: String,
}

impl CacheKey {
    #[must_use]
    pub fn new(
        kind: CacheKind,
        provider_id: impl Into<String>,
        media_type: Option<MediaType>,
        id: impl Into<String>,
        extra: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            kind,
            provider_id: provider_id.into(),
            media_type,
            id: id.into(),
            extras_fingerprint: fingerprint_extras(extra),
        }
    }

    fn canonical(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.kind.as_str(),
            self.provider_id,
            self.media_type.as_ref().map_or("-", MediaType::as_str),
            self.id,
            self.extras_fingerprint,
        )
    }
}

/// Canonicalise the extras map per spec §4.3: keys lower-cased and sorted,
/// values preserved as-is, so identical logical requests collide regardless
/// of key casing or insertion order.
#[must_use]
pub fn fingerprint_extras(extra: &BTreeMap<String, String>) -> String {
    let mut sorted: BTreeMap<String, &String> = BTreeMap::new();
    for (k, v) in extra {
        sorted.insert(k.to_lowercase(), v);
    }
    sorted.into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&")
}

#[derive(Clone)]
struct Entry {
    bytes: Arc<Vec<u8>>,
    ttl: Duration,
}

struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// TTL-keyed store of serialised provider responses.
///
/// Per-entry TTL is carried on the value so one `moka` cache can serve every
/// [`CacheKind`] without a TTL-per-namespace split. `invalidate_provider`
/// purges a partition via an auxiliary provider → keys index, since `moka`
/// has no native "delete by prefix".
pub struct ResponseCache {
    store: Cache<String, Entry>,
    singleflight: SingleFlight<String, Arc<Vec<u8>>, String>,
    provider_keys: DashMap<String, Vec<String>>,
    ttls: CacheTtls,
    hits: AtomicU64,
    misses: AtomicU64,
    approx_bytes: AtomicU64,
    kind_hits: DashMap<&'static str, u64>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(ttls: CacheTtls) -> Self {
        Self {
            store: Cache::builder().expire_after(EntryExpiry).build(),
            singleflight: SingleFlight::new(),
            provider_keys: DashMap::new(),
            ttls,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            approx_bytes: AtomicU64::new(0),
            kind_hits: DashMap::new(),
        }
    }

    /// `get(kind, key) -> Option<bytes>`. `moka` never returns an
    /// entry past its `expire_after_create` deadline, so a hit here is always
    /// fresh (testable property 4).
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<Vec<u8>>> {
        match self.store.get(&key.canonical()).await {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                *self.kind_hits.entry(key.kind.as_str()).or_insert(0) += 1;
                Some(entry.bytes)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// `set(kind, key, bytes, ttl)`: overwrite-on-collision.
    pub async fn set(&self, key: &CacheKey, bytes: Arc<Vec<u8>>) {
        let canonical = key.canonical();
        self.approx_bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.provider_keys.entry(key.provider_id.clone()).or_default().push(canonical.clone());
        self.store.insert(canonical, Entry { bytes, ttl: self.ttls.for_kind(key.kind) }).await;
    }

    /// `invalidate_provider(provider_id)`: purge a provider's
    /// entire cache partition, used on uninstall/disable/parse-error storms.
    pub async fn invalidate_provider(&self, provider_id: &str) {
        if let Some((_, keys)) = self.provider_keys.remove(provider_id) {
            for key in keys {
                self.store.invalidate(&key).await;
            }
        }
    }

    /// `clear_expired()`: idempotent sweep.
    pub async fn clear_expired(&self) {
        self.store.run_pending_tasks().await;
    }

    /// Drop every entry regardless of provider or TTL (engine facade
    /// `clear_cache()`, spec §4.7).
    pub async fn clear_all(&self) {
        self.store.invalidate_all();
        self.store.run_pending_tasks().await;
        self.provider_keys.clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries_total: self.store.entry_count(),
            approx_bytes: self.approx_bytes.load(Ordering::Relaxed),
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            by_kind: self.kind_hits.iter().map(|e| (e.key().to_string(), *e.value())).collect(),
        }
    }

    /// Fetch `key`, consulting the cache first and collapsing concurrent
    /// misses through the single-flight group (spec §4.3, testable property
    /// 5). `fetch` is expected to have already recorded health for its own
    /// outcome before returning; a cache hit skips it entirely, which is how
    /// "skip health recording on hit" falls out naturally.
    ///
    /// Returns `(bytes, served_from_cache)`.
    pub async fn get_or_fetch<Fut>(
        &self,
        key: &CacheKey,
        fetch: Fut,
    ) -> Result<(Arc<Vec<u8>>, bool), String>
    where
        Fut: std::future::Future<Output = Result<Vec<u8>, String>> + Send,
    {
        if let Some(bytes) = self.get(key).await {
            return Ok((bytes, true));
        }

        let canonical = key.canonical();
        let owned_key = key.clone();
        match self.singleflight.do_work(canonical, async move { fetch.await.map(Arc::new) }).await
        {
            Ok(bytes) => {
                self.set(&owned_key, bytes.clone()).await;
                Ok((bytes, false))
            }
            Err(super::singleflight::SingleFlightError::Inner(e)) => Err(e),
            Err(super::singleflight::SingleFlightError::WorkerFailed) => {
                Err("cache single-flight leader was dropped".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn key(kind: CacheKind, id: &str) -> CacheKey {
        CacheKey::new(kind, "provider-a", Some(MediaType::Movie), id, &BTreeMap::new())
    }

    #[test]
    fn extras_fingerprint_ignores_key_order_and_case() {
        let mut a = BTreeMap::new();
        a.insert("Genre".to_string(), "action".to_string());
        a.insert("skip".to_string(), "20".to_string());
        let mut b = BTreeMap::new();
        b.insert("skip".to_string(), "20".to_string());
        b.insert("genre".to_string(), "action".to_string());
        assert_eq!(fingerprint_extras(&a), fingerprint_extras(&b));
    }

    #[tokio::test]
    async fn set_then_get_returns_the_same_bytes() {
        let cache = ResponseCache::new(CacheTtls::default());
        let k = key(CacheKind::Catalog, "top");
        cache.set(&k, Arc::new(b"payload".to_vec())).await;
        assert_eq!(cache.get(&k).await.as_deref(), Some(&b"payload".to_vec()));
        assert_eq!(cache.stats().hit_count, 1);
    }

    #[tokio::test]
    async fn miss_then_hit_is_reflected_in_stats() {
        let cache = ResponseCache::new(CacheTtls::default());
        let k = key(CacheKind::Stream, "tt123");
        assert!(cache.get(&k).await.is_none());
        cache.set(&k, Arc::new(b"x".to_vec())).await;
        assert!(cache.get(&k).await.is_some());
        let stats = cache.stats();
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.hit_count, 1);
    }

    #[tokio::test]
    async fn invalidate_provider_purges_only_that_providers_entries() {
        let cache = ResponseCache::new(CacheTtls::default());
        let a = CacheKey::new(CacheKind::Catalog, "a", Some(MediaType::Movie), "top", &BTreeMap::new());
        let b = CacheKey::new(CacheKind::Catalog, "b", Some(MediaType::Movie), "top", &BTreeMap::new());
        cache.set(&a, Arc::new(b"a".to_vec())).await;
        cache.set(&b, Arc::new(b"b".to_vec())).await;

        cache.invalidate_provider("a").await;
        cache.clear_expired().await;

        assert!(cache.get(&a).await.is_none());
        assert!(cache.get(&b).await.is_some());
    }

    #[tokio::test]
    async fn get_or_fetch_calls_the_fetcher_exactly_once_per_key() {
        let cache = ResponseCache::new(CacheTtls::default());
        let k = key(CacheKind::Meta, "tt1");
        let (bytes, from_cache) =
            cache.get_or_fetch(&k, async { Ok(b"fresh".to_vec()) }).await.unwrap();
        assert!(!from_cache);
        assert_eq!(bytes.as_slice(), b"fresh");

        let (bytes2, from_cache2) =
            cache.get_or_fetch(&k, async { panic!("should not run: cache should hit") }).await.unwrap();
        assert!(from_cache2);
        assert_eq!(bytes2.as_slice(), b"fresh");
    }
}
