//! Shared domain types threaded between registry, cache, health, and aggregator

use std::time::Duration;

use addon_client::{Manifest, MediaType, ResourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An installed provider and its registry-owned state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub base_url: String,
    pub manifest: Manifest,
    pub enabled: bool,
    pub priority: i32,
    pub installed_at: DateTime<Utc>,
}

impl Provider {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    #[must_use]
    pub fn supports_resource(&self, kind: &ResourceKind) -> bool {
        self.manifest.supports_resource(kind)
    }

    #[must_use]
    pub fn supports_catalog(&self, media_type: &MediaType, catalog_id: &str) -> bool {
        self.manifest.catalog(media_type, catalog_id).is_some()
    }
}

/// Deterministic install ordering per spec §3 "InstalledProvidersView":
/// priority DESC, then install time ASC.
#[must_use]
pub fn order_providers(mut providers: Vec<Provider>) -> Vec<Provider> {
    providers.sort_by(|a, b| {
        b.priority.cmp(&a.priority).then(a.installed_at.cmp(&b.installed_at))
    });
    providers
}

/// Outcome of one call against one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Empty,
    HttpError,
    Timeout,
    ParseError,
    NetworkError,
}

impl Outcome {
    /// Whether this outcome counts toward `fail_count` in the health score
    /// formula (spec §4.4: "`fail_count` excludes `empty` outcomes").
    #[must_use]
    pub fn is_failure(self) -> bool {
        !matches!(self, Outcome::Success | Outcome::Empty)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Empty => "empty",
            Outcome::HttpError => "http_error",
            Outcome::Timeout => "timeout",
            Outcome::ParseError => "parse_error",
            Outcome::NetworkError => "network_error",
        }
    }

    /// Recover an [`Outcome`] from its [`Outcome::as_str`] tag, used to carry
    /// the outcome alongside a string error through the cache's single-flight
    /// plumbing (which is fixed to `Result<_, String>`). Unrecognised tags
    /// fall back to `network_error` rather than panicking.
    #[must_use]
    pub fn parse_tag(tag: &str) -> Self {
        match tag {
            "success" => Outcome::Success,
            "empty" => Outcome::Empty,
            "http_error" => Outcome::HttpError,
            "timeout" => Outcome::Timeout,
            "parse_error" => Outcome::ParseError,
            _ => Outcome::NetworkError,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetric {
    pub provider_id: String,
    pub operation: ResourceKind,
    pub latency: Duration,
    pub outcome: Outcome,
    pub detail: Option<String>,
    pub item_count: usize,
    pub observed_at: DateTime<Utc>,
}

/// Derived per-provider reliability summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub provider_id: String,
    pub display_name: Option<String>,
    pub total: u64,
    pub success: u64,
    pub fail: u64,
    pub mean_latency_ms: f64,
    pub last_error: Option<String>,
    pub score: f64,
    pub last_observed_at: Option<DateTime<Utc>>,
}

/// One row the facade exposes from `list_catalogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogInfo {
    pub provider_id: String,
    pub provider_name: String,
    pub catalog_id: String,
    pub catalog_name: String,
    pub media_type: MediaType,
    pub genres: Vec<String>,
    pub supported_extras: Vec<String>,
}

/// One provider's outcome within a single aggregation, surfaced to callers
/// as the "optional diagnostics field" spec §7 describes for partial
/// failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub provider_id: String,
    pub outcome: Outcome,
    pub error: Option<String>,
}

/// Result of `Aggregator::aggregate_catalog`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedCatalog {
    pub metas: Vec<addon_client::MetaPreview>,
    pub diagnostics: Vec<ProviderOutcome>,
}

/// Result of `Aggregator::aggregate_streams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedStreams {
    pub streams: Vec<addon_client::Stream>,
    pub diagnostics: Vec<ProviderOutcome>,
}

/// Result of `Aggregator::aggregate_meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedMeta {
    pub meta: addon_client::MetaItem,
    pub diagnostics: Vec<ProviderOutcome>,
}

/// Result of `Aggregator::aggregate_subtitles`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedSubtitles {
    pub subtitles: Vec<addon_client::Subtitle>,
    pub diagnostics: Vec<ProviderOutcome>,
}

/// Cache instrumentation returned by `ResponseCache::stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries_total: u64,
    pub approx_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub by_kind: std::collections::BTreeMap<String, u64>,
}
