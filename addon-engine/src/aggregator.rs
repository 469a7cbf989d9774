//! Aggregator: parallel fan-out across eligible providers, merge, dedup,
//! and rank.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use addon_client::{
    ClientConfig, ClientError, MediaType, MetaItem, MetaPreview, ProtocolClient, ResourceKind,
    Stream, Subtitle,
};

use crate::cache::{CacheKey, CacheKind, ResponseCache};
use crate::error::AggregateError;
use crate::health::HealthTracker;
use crate::models::{
    AggregatedCatalog, AggregatedMeta, AggregatedStreams, AggregatedSubtitles, Outcome, Provider,
    ProviderOutcome,
};
use crate::registry::ProviderRegistry;

/// Fans one logical query out across every eligible provider and merges the
/// answers.
///
/// Holds no provider-specific state of its own; the live provider set,
/// cached responses, and reliability scores are read fresh from its
/// collaborators once per call, per spec §9 ("derive an eligible sequence
/// once per aggregation ... do not re-query the DB per-call").
pub struct Aggregator {
    registry: Arc<ProviderRegistry>,
    cache: Arc<ResponseCache>,
    health: Arc<HealthTracker>,
    client_config: ClientConfig,
    deadline: Duration,
}

/// One eligible provider in dispatch order, annotated with the health score
/// it had at the start of this aggregation.
type Scored = (Provider, f64);

impl Aggregator {
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cache: Arc<ResponseCache>,
        health: Arc<HealthTracker>,
        client_config: ClientConfig,
        deadline: Duration,
    ) -> Self {
        Self { registry, cache, health, client_config, deadline }
    }

    /// `aggregate_catalog(media_type, catalog_id, extras) -> AggregatedCatalog`.
    pub async fn aggregate_catalog(
        &self,
        media_type: &MediaType,
        catalog_id: &str,
        extras: &BTreeMap<String, String>,
    ) -> Result<AggregatedCatalog, AggregateError> {
        let eligible = self.registry.find_catalog_providers(media_type, catalog_id).await;
        if eligible.is_empty() {
            return Err(AggregateError::NoProviders(ResourceKind::Catalog));
        }
        let sequence = self.eligible_sequence(eligible).await;

        let mut join_set = JoinSet::new();
        let mut pending: HashMap<String, Provider> = HashMap::new();
        for (provider, score) in sequence {
            pending.insert(provider.id.clone(), provider.clone());
            let cache = Arc::clone(&self.cache);
            let health = Arc::clone(&self.health);
            let client_config = self.client_config.clone();
            let media_type = media_type.clone();
            let catalog_id = catalog_id.to_string();
            let extras = extras.clone();
            join_set.spawn(async move {
                let result =
                    dispatch_catalog_one(cache, health, client_config, &provider, &media_type, &catalog_id, &extras)
                        .await;
                (provider, score, result)
            });
        }

        let (mut oks, diagnostics) = self.drain(join_set, pending, ResourceKind::Catalog).await;
        if oks.is_empty() {
            return Err(AggregateError::AllFailed(failure_map(&diagnostics)));
        }
        sort_by_priority_then_score(&mut oks);
        let per_provider: Vec<(Provider, Vec<MetaPreview>)> =
            oks.into_iter().map(|(p, _score, v)| (p, v)).collect();

        Ok(AggregatedCatalog { metas: merge_catalogs(per_provider), diagnostics })
    }

    /// `aggregate_streams(media_type, media_id) -> AggregatedStreams`.
    pub async fn aggregate_streams(
        &self,
        media_type: &MediaType,
        media_id: &str,
    ) -> Result<AggregatedStreams, AggregateError> {
        let eligible = self.registry.find_providers_by_resource(&ResourceKind::Stream).await;
        if eligible.is_empty() {
            return Err(AggregateError::NoProviders(ResourceKind::Stream));
        }
        let sequence = self.eligible_sequence(eligible).await;

        let mut join_set = JoinSet::new();
        let mut pending: HashMap<String, Provider> = HashMap::new();
        for (provider, score) in sequence {
            pending.insert(provider.id.clone(), provider.clone());
            let cache = Arc::clone(&self.cache);
            let health = Arc::clone(&self.health);
            let client_config = self.client_config.clone();
            let media_type = media_type.clone();
            let media_id = media_id.to_string();
            join_set.spawn(async move {
                let result =
                    dispatch_streams_one(cache, health, client_config, &provider, &media_type, &media_id).await;
                (provider, score, result)
            });
        }

        let (oks, diagnostics) = self.drain(join_set, pending, ResourceKind::Stream).await;
        if oks.is_empty() {
            return Err(AggregateError::AllFailed(failure_map(&diagnostics)));
        }

        Ok(AggregatedStreams { streams: merge_streams(oks), diagnostics })
    }

    /// `aggregate_meta(media_type, media_id) -> AggregatedMeta`.
    pub async fn aggregate_meta(
        &self,
        media_type: &MediaType,
        media_id: &str,
    ) -> Result<AggregatedMeta, AggregateError> {
        let eligible = self.registry.find_providers_by_resource(&ResourceKind::Meta).await;
        if eligible.is_empty() {
            return Err(AggregateError::NoProviders(ResourceKind::Meta));
        }
        let sequence = self.eligible_sequence(eligible).await;

        let mut join_set = JoinSet::new();
        let mut pending: HashMap<String, Provider> = HashMap::new();
        for (provider, score) in sequence {
            pending.insert(provider.id.clone(), provider.clone());
            let cache = Arc::clone(&self.cache);
            let health = Arc::clone(&self.health);
            let client_config = self.client_config.clone();
            let media_type = media_type.clone();
            let media_id = media_id.to_string();
            join_set.spawn(async move {
                let result =
                    dispatch_meta_one(cache, health, client_config, &provider, &media_type, &media_id).await;
                (provider, score, result)
            });
        }

        let (mut oks, diagnostics) = self.drain(join_set, pending, ResourceKind::Meta).await;
        if oks.is_empty() {
            return Err(AggregateError::AllFailed(failure_map(&diagnostics)));
        }
        sort_by_priority_then_score(&mut oks);

        let mut iter = oks.into_iter();
        let (_, _, mut meta) = iter.next().expect("checked non-empty above");
        if meta.episodes.is_empty() {
            if let Some((_, _, other)) = iter.find(|(_, _, m)| !m.episodes.is_empty()) {
                meta.episodes = other.episodes;
            }
        }

        Ok(AggregatedMeta { meta, diagnostics })
    }

    /// `aggregate_subtitles(media_type, media_id) -> AggregatedSubtitles`.
    pub async fn aggregate_subtitles(
        &self,
        media_type: &MediaType,
        media_id: &str,
    ) -> Result<AggregatedSubtitles, AggregateError> {
        let eligible = self.registry.find_providers_by_resource(&ResourceKind::Subtitles).await;
        if eligible.is_empty() {
            return Err(AggregateError::NoProviders(ResourceKind::Subtitles));
        }
        let sequence = self.eligible_sequence(eligible).await;

        let mut join_set = JoinSet::new();
        let mut pending: HashMap<String, Provider> = HashMap::new();
        for (provider, score) in sequence {
            pending.insert(provider.id.clone(), provider.clone());
            let cache = Arc::clone(&self.cache);
            let health = Arc::clone(&self.health);
            let client_config = self.client_config.clone();
            let media_type = media_type.clone();
            let media_id = media_id.to_string();
            join_set.spawn(async move {
                let result =
                    dispatch_subtitles_one(cache, health, client_config, &provider, &media_type, &media_id).await;
                (provider, score, result)
            });
        }

        let (mut oks, diagnostics) = self.drain(join_set, pending, ResourceKind::Subtitles).await;
        if oks.is_empty() {
            return Err(AggregateError::AllFailed(failure_map(&diagnostics)));
        }
        sort_by_priority_then_score(&mut oks);

        Ok(AggregatedSubtitles { subtitles: merge_subtitles(oks), diagnostics })
    }

    /// Derive the `(priority DESC, health DESC, install ASC)` eligible
    /// sequence once per aggregation.
    async fn eligible_sequence(&self, providers: Vec<Provider>) -> Vec<Scored> {
        let mut scored: Vec<Scored> = providers
            .into_iter()
            .map(|p| {
                let score = self.health.summary(&p.id).score;
                (p, score)
            })
            .collect();
        scored.sort_by(|(a, a_score), (b, b_score)| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b_score.partial_cmp(a_score).unwrap_or(Ordering::Equal))
                .then_with(|| a.installed_at.cmp(&b.installed_at))
        });
        scored
    }

    /// Drain `join_set` until every task finishes or `self.deadline` elapses
    ///. Providers still outstanding past the deadline are aborted,
    /// recorded as `timeout`, and excluded from the result — a late reply
    /// from an aborted task is discarded, never cached or recorded again.
    async fn drain<T: Send + 'static>(
        &self,
        mut join_set: JoinSet<(Provider, f64, Result<T, ProviderOutcome>)>,
        mut pending: HashMap<String, Provider>,
        operation: ResourceKind,
    ) -> (Vec<(Provider, f64, T)>, Vec<ProviderOutcome>) {
        let start = Instant::now();
        let mut oks = Vec::new();
        let mut diagnostics = Vec::new();

        loop {
            let Some(remaining) = self.deadline.checked_sub(start.elapsed()) else { break };
            match tokio::time::timeout(remaining, join_set.join_next()).await {
                Ok(Some(Ok((provider, score, Ok(value))))) => {
                    pending.remove(&provider.id);
                    oks.push((provider, score, value));
                }
                Ok(Some(Ok((provider, _score, Err(outcome))))) => {
                    pending.remove(&provider.id);
                    diagnostics.push(outcome);
                }
                Ok(Some(Err(join_err))) => {
                    tracing::warn!(error = %join_err, "provider dispatch task panicked");
                }
                Ok(None) => break,
                Err(_elapsed) => break,
            }
        }

        join_set.abort_all();
        for (id, _provider) in pending {
            tracing::debug!(provider_id = %id, "aggregation deadline exceeded, cancelling provider");
            self.health.record(
                &id,
                operation.clone(),
                self.deadline,
                Outcome::Timeout,
                Some("aggregation deadline exceeded".to_string()),
                0,
            );
            diagnostics.push(ProviderOutcome {
                provider_id: id,
                outcome: Outcome::Timeout,
                error: Some("aggregation deadline exceeded".to_string()),
            });
        }

        (oks, diagnostics)
    }
}

fn sort_by_priority_then_score<T>(items: &mut [(Provider, f64, T)]) {
    items.sort_by(|(a, a_score), (b, b_score)| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b_score.partial_cmp(a_score).unwrap_or(Ordering::Equal))
            .then_with(|| a.installed_at.cmp(&b.installed_at))
    });
}

fn failure_map(diagnostics: &[ProviderOutcome]) -> HashMap<String, String> {
    diagnostics
        .iter()
        .map(|d| (d.provider_id.clone(), d.error.clone().unwrap_or_else(|| d.outcome.to_string())))
        .collect()
}

/// Classify a transport error into the spec §4.4 outcome taxonomy.
fn classify_client_error(err: &ClientError) -> Outcome {
    match err {
        ClientError::Timeout => Outcome::Timeout,
        ClientError::NetworkError(_) | ClientError::InvalidUrl(_) => Outcome::NetworkError,
        ClientError::HttpError(_) => Outcome::HttpError,
        ClientError::ParseError(_) | ClientError::ValidationError(_) | ClientError::SizeExceeded { .. } => {
            Outcome::ParseError
        }
    }
}

/// Encode an outcome alongside its detail string so it survives the cache's
/// `Result<_, String>` single-flight plumbing (see [`Outcome::parse_tag`]).
fn encode_outcome(outcome: Outcome, detail: &str) -> String {
    format!("{}|{detail}", outcome.as_str())
}

fn decode_outcome(raw: &str) -> (Outcome, String) {
    match raw.split_once('|') {
        Some((tag, detail)) => (Outcome::parse_tag(tag), detail.to_string()),
        None => (Outcome::NetworkError, raw.to_string()),
    }
}

/// Map `year` into the `genre` transport slot when a provider's catalog
/// doesn't declare a `year` extra of its own (spec §9 Open Question,
/// SPEC_FULL.md §4 resolution).
fn apply_year_fallback(
    provider: &Provider,
    media_type: &MediaType,
    catalog_id: &str,
    extras: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let Some(year_value) = extras.get("year").cloned() else {
        return extras.clone();
    };
    let declares_year = provider
        .manifest
        .catalog(media_type, catalog_id)
        .is_some_and(|c| c.extra.iter().any(|e| e.name == "year"));
    if declares_year {
        return extras.clone();
    }
    let mut mapped = extras.clone();
    mapped.remove("year");
    mapped.entry("genre".to_string()).or_insert(year_value);
    mapped
}

async fn dispatch_catalog_one(
    cache: Arc<ResponseCache>,
    health: Arc<HealthTracker>,
    client_config: ClientConfig,
    provider: &Provider,
    media_type: &MediaType,
    catalog_id: &str,
    extras: &BTreeMap<String, String>,
) -> Result<Vec<MetaPreview>, ProviderOutcome> {
    let provider_extras = apply_year_fallback(provider, media_type, catalog_id, extras);
    let cache_key = CacheKey::new(
        CacheKind::Catalog,
        provider.id.as_str(),
        Some(media_type.clone()),
        catalog_id,
        &provider_extras,
    );

    let provider_id = provider.id.clone();
    let base_url = provider.base_url.clone();
    let media_type = media_type.clone();
    let catalog_id = catalog_id.to_string();

    let fetch = async move {
        let start = Instant::now();
        let outcome_result: Result<Vec<MetaPreview>, ClientError> = async {
            let client = ProtocolClient::new(base_url, client_config)?;
            let response = client.get_catalog(&media_type, &catalog_id, &provider_extras).await?;
            Ok(response.metas)
        }
        .await;
        let latency = start.elapsed();
        match outcome_result {
            Ok(metas) => {
                let outcome = if metas.is_empty() { Outcome::Empty } else { Outcome::Success };
                health.record(&provider_id, ResourceKind::Catalog, latency, outcome, None, metas.len());
                serde_json::to_vec(&metas).map_err(|e| encode_outcome(Outcome::ParseError, &e.to_string()))
            }
            Err(e) => {
                let outcome = classify_client_error(&e);
                let detail = e.to_string();
                health.record(&provider_id, ResourceKind::Catalog, latency, outcome, Some(detail.clone()), 0);
                Err(encode_outcome(outcome, &detail))
            }
        }
    };

    match cache.get_or_fetch(&cache_key, fetch).await {
        Ok((bytes, _from_cache)) => serde_json::from_slice(&bytes).map_err(|e| ProviderOutcome {
            provider_id: provider.id.clone(),
            outcome: Outcome::ParseError,
            error: Some(e.to_string()),
        }),
        Err(raw) => {
            let (outcome, detail) = decode_outcome(&raw);
            Err(ProviderOutcome { provider_id: provider.id.clone(), outcome, error: Some(detail) })
        }
    }
}

async fn dispatch_streams_one(
    cache: Arc<ResponseCache>,
    health: Arc<HealthTracker>,
    client_config: ClientConfig,
    provider: &Provider,
    media_type: &MediaType,
    media_id: &str,
) -> Result<Vec<Stream>, ProviderOutcome> {
    let cache_key = CacheKey::new(
        CacheKind::Stream,
        provider.id.as_str(),
        Some(media_type.clone()),
        media_id,
        &BTreeMap::new(),
    );

    let provider_id = provider.id.clone();
    let base_url = provider.base_url.clone();
    let media_type = media_type.clone();
    let media_id = media_id.to_string();

    let fetch = async move {
        let start = Instant::now();
        let outcome_result: Result<Vec<Stream>, ClientError> = async {
            let client = ProtocolClient::new(base_url, client_config)?;
            let response = client.get_streams(&media_type, &media_id).await?;
            Ok(response.streams)
        }
        .await;
        let latency = start.elapsed();
        match outcome_result {
            Ok(streams) => {
                let outcome = if streams.is_empty() { Outcome::Empty } else { Outcome::Success };
                health.record(&provider_id, ResourceKind::Stream, latency, outcome, None, streams.len());
                serde_json::to_vec(&streams).map_err(|e| encode_outcome(Outcome::ParseError, &e.to_string()))
            }
            Err(e) => {
                let outcome = classify_client_error(&e);
                let detail = e.to_string();
                health.record(&provider_id, ResourceKind::Stream, latency, outcome, Some(detail.clone()), 0);
                Err(encode_outcome(outcome, &detail))
            }
        }
    };

    match cache.get_or_fetch(&cache_key, fetch).await {
        Ok((bytes, _from_cache)) => serde_json::from_slice(&bytes).map_err(|e| ProviderOutcome {
            provider_id: provider.id.clone(),
            outcome: Outcome::ParseError,
            error: Some(e.to_string()),
        }),
        Err(raw) => {
            let (outcome, detail) = decode_outcome(&raw);
            Err(ProviderOutcome { provider_id: provider.id.clone(), outcome, error: Some(detail) })
        }
    }
}

async fn dispatch_meta_one(
    cache: Arc<ResponseCache>,
    health: Arc<HealthTracker>,
    client_config: ClientConfig,
    provider: &Provider,
    media_type: &MediaType,
    media_id: &str,
) -> Result<MetaItem, ProviderOutcome> {
    let cache_key = CacheKey::new(
        CacheKind::Meta,
        provider.id.as_str(),
        Some(media_type.clone()),
        media_id,
        &BTreeMap::new(),
    );

    let provider_id = provider.id.clone();
    let base_url = provider.base_url.clone();
    let media_type = media_type.clone();
    let media_id = media_id.to_string();

    let fetch = async move {
        let start = Instant::now();
        let outcome_result: Result<MetaItem, ClientError> = async {
            let client = ProtocolClient::new(base_url, client_config)?;
            let response = client.get_meta(&media_type, &media_id).await?;
            Ok(response.meta)
        }
        .await;
        let latency = start.elapsed();
        match outcome_result {
            Ok(meta) => {
                let item_count = 1 + meta.episodes.len();
                health.record(&provider_id, ResourceKind::Meta, latency, Outcome::Success, None, item_count);
                serde_json::to_vec(&meta).map_err(|e| encode_outcome(Outcome::ParseError, &e.to_string()))
            }
            Err(e) => {
                let outcome = classify_client_error(&e);
                let detail = e.to_string();
                health.record(&provider_id, ResourceKind::Meta, latency, outcome, Some(detail.clone()), 0);
                Err(encode_outcome(outcome, &detail))
            }
        }
    };

    match cache.get_or_fetch(&cache_key, fetch).await {
        Ok((bytes, _from_cache)) => serde_json::from_slice(&bytes).map_err(|e| ProviderOutcome {
            provider_id: provider.id.clone(),
            outcome: Outcome::ParseError,
            error: Some(e.to_string()),
        }),
        Err(raw) => {
            let (outcome, detail) = decode_outcome(&raw);
            Err(ProviderOutcome { provider_id: provider.id.clone(), outcome, error: Some(detail) })
        }
    }
}

async fn dispatch_subtitles_one(
    cache: Arc<ResponseCache>,
    health: Arc<HealthTracker>,
    client_config: ClientConfig,
    provider: &Provider,
    media_type: &MediaType,
    media_id: &str,
) -> Result<Vec<Subtitle>, ProviderOutcome> {
    let cache_key = CacheKey::new(
        CacheKind::Subtitles,
        provider.id.as_str(),
        Some(media_type.clone()),
        media_id,
        &BTreeMap::new(),
    );

    let provider_id = provider.id.clone();
    let base_url = provider.base_url.clone();
    let media_type = media_type.clone();
    let media_id = media_id.to_string();

    let fetch = async move {
        let start = Instant::now();
        let outcome_result: Result<Vec<Subtitle>, ClientError> = async {
            let client = ProtocolClient::new(base_url, client_config)?;
            let response = client.get_subtitles(&media_type, &media_id).await?;
            Ok(response.subtitles)
        }
        .await;
        let latency = start.elapsed();
        match outcome_result {
            Ok(subs) => {
                let outcome = if subs.is_empty() { Outcome::Empty } else { Outcome::Success };
                health.record(&provider_id, ResourceKind::Subtitles, latency, outcome, None, subs.len());
                serde_json::to_vec(&subs).map_err(|e| encode_outcome(Outcome::ParseError, &e.to_string()))
            }
            Err(e) => {
                let outcome = classify_client_error(&e);
                let detail = e.to_string();
                health.record(&provider_id, ResourceKind::Subtitles, latency, outcome, Some(detail.clone()), 0);
                Err(encode_outcome(outcome, &detail))
            }
        }
    };

    match cache.get_or_fetch(&cache_key, fetch).await {
        Ok((bytes, _from_cache)) => serde_json::from_slice(&bytes).map_err(|e| ProviderOutcome {
            provider_id: provider.id.clone(),
            outcome: Outcome::ParseError,
            error: Some(e.to_string()),
        }),
        Err(raw) => {
            let (outcome, detail) = decode_outcome(&raw);
            Err(ProviderOutcome { provider_id: provider.id.clone(), outcome, error: Some(detail) })
        }
    }
}

/// Concatenate, dedup by id (keeping the highest-priority provider's entry
/// and filling gaps from lower-priority duplicates), then round-robin
/// interleave so no single provider dominates the head of the list
/// (spec §4.5 "Merge & dedup", "Ranking of final lists").
fn merge_catalogs(per_provider: Vec<(Provider, Vec<MetaPreview>)>) -> Vec<MetaPreview> {
    let mut canonical: HashMap<String, MetaPreview> = HashMap::new();
    for (_, metas) in &per_provider {
        for item in metas {
            canonical
                .entry(item.id.clone())
                .and_modify(|existing| merge_meta_preview_fields(existing, item))
                .or_insert_with(|| item.clone());
        }
    }

    let mut emitted: HashSet<String> = HashSet::new();
    let mut result = Vec::new();
    let max_len = per_provider.iter().map(|(_, m)| m.len()).max().unwrap_or(0);
    for round in 0..max_len {
        for (_, metas) in &per_provider {
            let Some(item) = metas.get(round) else { continue };
            if emitted.insert(item.id.clone()) {
                if let Some(merged) = canonical.get(&item.id) {
                    result.push(merged.clone());
                }
            }
        }
    }
    result
}

fn merge_meta_preview_fields(existing: &mut MetaPreview, other: &MetaPreview) {
    if existing.poster.is_none() {
        existing.poster = other.poster.clone();
    }
    if existing.poster_shape.is_none() {
        existing.poster_shape = other.poster_shape;
    }
    if existing.background.is_none() {
        existing.background = other.background.clone();
    }
    if existing.logo.is_none() {
        existing.logo = other.logo.clone();
    }
    if existing.description.is_none() {
        existing.description = other.description.clone();
    }
    if existing.release_info.is_none() {
        existing.release_info = other.release_info.clone();
    }
    if existing.imdb_rating.is_none() {
        existing.imdb_rating = other.imdb_rating;
    }
}

#[derive(Clone)]
struct StreamCandidate {
    stream: Stream,
    priority: i32,
    score: f64,
}

/// Dedup by normalised URL, keeping the candidate whose provider has the
/// higher health score (ties: priority, then appearance order), then rank
/// by `(health DESC, priority DESC, quality heuristic DESC)`.
fn merge_streams(per_provider: Vec<(Provider, f64, Vec<Stream>)>) -> Vec<Stream> {
    let mut by_url: HashMap<String, StreamCandidate> = HashMap::new();
    for (provider, score, streams) in &per_provider {
        for stream in streams {
            let key = normalize_stream_url(&stream.url);
            let candidate =
                StreamCandidate { stream: stream.clone(), priority: provider.priority, score: *score };
            by_url
                .entry(key)
                .and_modify(|existing| {
                    if is_better_stream(&candidate, existing) {
                        *existing = candidate.clone();
                    }
                })
                .or_insert(candidate);
        }
    }

    let mut candidates: Vec<StreamCandidate> = by_url.into_values().collect();
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| quality_rank(&b.stream).cmp(&quality_rank(&a.stream)))
    });
    candidates.into_iter().map(|c| c.stream).collect()
}

fn is_better_stream(candidate: &StreamCandidate, existing: &StreamCandidate) -> bool {
    if candidate.score != existing.score {
        return candidate.score > existing.score;
    }
    candidate.priority > existing.priority
}

/// Lowercase the host, strip the scheme's default port, and sort query pairs
/// so logically-identical stream URLs collide during dedup.
fn normalize_stream_url(raw: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw) else { return raw.to_string() };

    if let Some(host) = parsed.host_str() {
        let lower = host.to_lowercase();
        let _ = parsed.set_host(Some(&lower));
    }

    if let Some(port) = parsed.port() {
        let default_port = match parsed.scheme() {
            "http" => Some(80),
            "https" => Some(443),
            _ => None,
        };
        if Some(port) == default_port {
            let _ = parsed.set_port(None);
        }
    }

    let mut pairs: Vec<(String, String)> =
        parsed.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
    pairs.sort();
    parsed.set_query(None);
    if !pairs.is_empty() {
        if let Ok(qs) = serde_urlencoded::to_string(&pairs) {
            parsed.set_query(Some(&qs));
        }
    }

    parsed.to_string()
}

/// Extract a resolution hint from a stream's title/name
///: `2160p > 1080p > 720p > 480p > unknown`.
fn quality_rank(stream: &Stream) -> u8 {
    let haystack =
        format!("{} {}", stream.title.as_deref().unwrap_or(""), stream.name.as_deref().unwrap_or(""))
            .to_lowercase();
    if haystack.contains("2160p") || haystack.contains("4k") {
        4
    } else if haystack.contains("1080p") {
        3
    } else if haystack.contains("720p") {
        2
    } else if haystack.contains("480p") {
        1
    } else {
        0
    }
}

/// Dedup by `(lang, url)`, preserving the priority-ordered appearance order
///.
fn merge_subtitles(per_provider: Vec<(Provider, f64, Vec<Subtitle>)>) -> Vec<Subtitle> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut result = Vec::new();
    for (_, _, subs) in &per_provider {
        for sub in subs {
            if seen.insert((sub.lang.clone(), sub.url.clone())) {
                result.push(sub.clone());
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use addon_client::{BehaviorHints, CatalogDescriptor, Manifest, StreamBehaviorHints};
    use chrono::Utc;

    fn provider(id: &str, priority: i32) -> Provider {
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

    fn meta_preview(id: &str) -> MetaPreview {
        MetaPreview {
            id: id.to_string(),
            media_type: MediaType::Movie,
            name: id.to_string(),
            poster: None,
            poster_shape: None,
            background: None,
            logo: None,
            description: None,
            release_info: None,
            imdb_rating: None,
        }
    }

    #[test]
    fn merging_a_catalog_with_itself_is_idempotent() {
        let p = provider("a", 0);
        let items = vec![meta_preview("tt1"), meta_preview("tt2"), meta_preview("tt3")];
        let once = merge_catalogs(vec![(p.clone(), items.clone())]);
        let twice = merge_catalogs(vec![(p.clone(), items.clone()), (p, items.clone())]);
        let once_ids: Vec<_> = once.iter().map(|m| m.id.clone()).collect();
        let twice_ids: Vec<_> = twice.iter().map(|m| m.id.clone()).collect();
        assert_eq!(once_ids, twice_ids);
        assert_eq!(once_ids, vec!["tt1", "tt2", "tt3"]);
    }

    #[test]
    fn catalog_dedup_prefers_the_higher_priority_providers_fields() {
        let high = provider("high", 10);
        let low = provider("low", 0);
        let mut from_low = meta_preview("tt1");
        from_low.poster = Some("low-poster".to_string());
        let mut from_high = meta_preview("tt1");
        from_high.poster = None;
        from_high.background = Some("high-background".to_string());

        let merged = merge_catalogs(vec![(high, vec![from_high]), (low, vec![from_low])]);
        assert_eq!(merged.len(), 1);
        // highest-priority provider's entry is canonical; its own empty
        // field is filled in from the lower-priority duplicate.
        assert_eq!(merged[0].poster.as_deref(), Some("low-poster"));
        assert_eq!(merged[0].background.as_deref(), Some("high-background"));
    }

    #[test]
    fn catalog_round_robin_interleaves_providers() {
        let a = provider("a", 5);
        let b = provider("b", 5);
        let a_items = vec![meta_preview("a1"), meta_preview("a2")];
        let b_items = vec![meta_preview("b1"), meta_preview("b2")];
        let merged = merge_catalogs(vec![(a, a_items), (b, b_items)]);
        let ids: Vec<_> = merged.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["a1", "b1", "a2", "b2"]);
    }

    fn stream(url: &str, title: &str) -> Stream {
        Stream {
            url: url.to_string(),
            title: Some(title.to_string()),
            name: None,
            description: None,
            behavior_hints: StreamBehaviorHints::default(),
            subtitles: vec![],
        }
    }

    #[test]
    fn stream_dedup_keeps_the_higher_health_providers_entry() {
        let strong = provider("strong", 0);
        let weak = provider("weak", 0);
        let merged = merge_streams(vec![
            (weak, 40.0, vec![stream("https://Host.example:443/a?x=1&y=2", "720p")]),
            (strong, 90.0, vec![stream("https://host.example/a?y=2&x=1", "1080p")]),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title.as_deref(), Some("1080p"));
    }

    #[test]
    fn streams_rank_by_health_then_priority_then_quality() {
        let p1 = provider("p1", 0);
        let p2 = provider("p2", 0);
        let merged = merge_streams(vec![
            (p1, 80.0, vec![stream("https://a.example/1", "480p")]),
            (p2, 80.0, vec![stream("https://b.example/2", "2160p")]),
        ]);
        assert_eq!(merged[0].title.as_deref(), Some("2160p"));
    }

    #[test]
    fn subtitle_dedup_by_lang_and_url() {
        let p = provider("p", 0);
        let subs = vec![
            Subtitle { id: "1".to_string(), lang: "eng".to_string(), url: "https://x/1.vtt".to_string() },
            Subtitle { id: "2".to_string(), lang: "eng".to_string(), url: "https://x/1.vtt".to_string() },
            Subtitle { id: "3".to_string(), lang: "spa".to_string(), url: "https://x/1.vtt".to_string() },
        ];
        let merged = merge_subtitles(vec![(p, 100.0, subs)]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn year_falls_back_to_genre_when_provider_does_not_declare_it() {
        let p = provider("p", 0);
        let mut extras = BTreeMap::new();
        extras.insert("year".to_string(), "1999".to_string());
        let mapped = apply_year_fallback(&p, &MediaType::Movie, "top", &extras);
        assert_eq!(mapped.get("genre").map(String::as_str), Some("1999"));
        assert!(!mapped.contains_key("year"));
    }

    #[test]
    fn year_is_passed_through_when_provider_declares_it() {
        let mut p = provider("p", 0);
        p.manifest.catalogs[0].extra = vec![addon_client::ExtraField {
            name: "year".to_string(),
            is_required: false,
            options: vec![],
            options_limit: None,
        }];
        let mut extras = BTreeMap::new();
        extras.insert("year".to_string(), "1999".to_string());
        let mapped = apply_year_fallback(&p, &MediaType::Movie, "top", &extras);
        assert_eq!(mapped.get("year").map(String::as_str), Some("1999"));
        assert!(!mapped.contains_key("genre"));
    }
}
