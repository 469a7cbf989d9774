//! Protocol client — one provider's HTTP surface

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::error::{ClientError, Result};
use crate::manifest::validate_manifest;
use crate::retry::RetryPolicy;
use crate::types::{
    CatalogResponse, Manifest, MediaType, MetaResponse, StreamResponse, SubtitleResponse,
};
use crate::validate::validate_stream_url;

/// Response body cap (spec §5: "response size: ≤ 10 MB").
pub const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;
/// Catalog items are truncated, not rejected.
pub const MAX_CATALOG_ITEMS: usize = 1000;

/// Order extras are concatenated into the path-embedded legacy form, and the
/// order recognised when building the query string.
const EXTRA_ORDER: &[&str] = &["skip", "genre", "search", "year"];

/// Configuration for [`ProtocolClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub restricted_mode: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            restricted_mode: true,
        }
    }
}

/// HTTP client wrapping a single addon's base URL.
pub struct ProtocolClient {
    http: Client,
    base_url: String,
    config: ClientConfig,
}

impl ProtocolClient {
    /// Build a client for `base_url`, normalising a `.../manifest.json` URL
    /// down to its base (spec §4.6 `install` flow; original `install_addon`
    /// normalisation, folded in per SPEC_FULL.md §2).
    pub fn new(base_url: impl Into<String>, config: ClientConfig) -> Result<Self> {
        let mut base = base_url.into();
        if let Some(stripped) = base.strip_suffix("/manifest.json") {
            base = stripped.to_string();
        }
        base = base.trim_end_matches('/').to_string();

        let parsed =
            url::Url::parse(&base).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ClientError::InvalidUrl(format!(
                "scheme `{}` is not http/https",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none() {
            return Err(ClientError::InvalidUrl("missing host".to_string()));
        }

        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;

        Ok(Self { http, base_url: base, config })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET <base>/manifest.json`.
    pub async fn fetch_manifest(&self) -> Result<Manifest> {
        let url = format!("{}/manifest.json", self.base_url);
        let bytes = self.get_with_retry(&url).await?;
        validate_manifest(&bytes).map_err(Into::into)
    }

    /// `GET <base>/catalog/{type}/{id}.json[?extras]`.
    pub async fn get_catalog(
        &self,
        media_type: &MediaType,
        catalog_id: &str,
        extra: &BTreeMap<String, String>,
    ) -> Result<CatalogResponse> {
        let url = self.build_catalog_url(media_type, catalog_id, extra)?;
        let bytes = self.get_with_retry(&url).await?;
        let mut parsed: CatalogResponse =
            serde_json::from_slice(&bytes).map_err(|e| ClientError::ParseError(e.to_string()))?;

        parsed.metas.retain(|m| !m.id.is_empty() && !m.name.is_empty());
        if parsed.metas.len() > MAX_CATALOG_ITEMS {
            tracing::debug!(
                base_url = %self.base_url,
                items = parsed.metas.len(),
                "truncating catalog response to MAX_CATALOG_ITEMS"
            );
            parsed.metas.truncate(MAX_CATALOG_ITEMS);
        }
        Ok(parsed)
    }

    /// `GET <base>/stream/{type}/{id}.json`. `media_id`
    /// is passed verbatim, including episode-composite ids.
    pub async fn get_streams(&self, media_type: &MediaType, media_id: &str) -> Result<StreamResponse> {
        let url = format!("{}/stream/{}/{}.json", self.base_url, media_type, encode_segment(media_id));
        let bytes = self.get_with_retry(&url).await?;
        let mut parsed: StreamResponse =
            serde_json::from_slice(&bytes).map_err(|e| ClientError::ParseError(e.to_string()))?;

        parsed.streams.retain(|s| validate_stream_url(&s.url, self.config.restricted_mode));
        Ok(parsed)
    }

    /// `GET <base>/meta/{type}/{id}.json`.
    pub async fn get_meta(&self, media_type: &MediaType, media_id: &str) -> Result<MetaResponse> {
        let url = format!("{}/meta/{}/{}.json", self.base_url, media_type, encode_segment(media_id));
        let bytes = self.get_with_retry(&url).await?;
        let mut parsed: MetaResponse =
            serde_json::from_slice(&bytes).map_err(|e| ClientError::ParseError(e.to_string()))?;

        parsed.meta.episodes.retain(|ep| {
            crate::validate::parse_episode_id(&ep.id)
                .is_some_and(|(_, season, episode)| season == ep.season && episode == ep.episode)
        });
        Ok(parsed)
    }

    /// `GET <base>/subtitles/{type}/{id}.json`.
    pub async fn get_subtitles(
        &self,
        media_type: &MediaType,
        media_id: &str,
    ) -> Result<SubtitleResponse> {
        let url =
            format!("{}/subtitles/{}/{}.json", self.base_url, media_type, encode_segment(media_id));
        let bytes = self.get_with_retry(&url).await?;
        let mut parsed: SubtitleResponse =
            serde_json::from_slice(&bytes).map_err(|e| ClientError::ParseError(e.to_string()))?;

        parsed.subtitles.retain(|s| validate_stream_url(&s.url, self.config.restricted_mode));
        Ok(parsed)
    }

    fn build_catalog_url(
        &self,
        media_type: &MediaType,
        catalog_id: &str,
        extra: &BTreeMap<String, String>,
    ) -> Result<String> {
        let base =
            format!("{}/catalog/{}/{}.json", self.base_url, media_type, encode_segment(catalog_id));
        if extra.is_empty() {
            return Ok(base);
        }

        let mut ordered: Vec<(&str, &str)> = Vec::new();
        for key in EXTRA_ORDER {
            if let Some(value) = extra.get(*key) {
                ordered.push((key, value));
            }
        }
        let query = serde_urlencoded::to_string(&ordered)
            .map_err(|e| ClientError::ValidationError(e.to_string()))?;
        Ok(format!("{base}?{query}"))
    }

    /// Issue a GET with the retry policy from spec §4.2: 4xx is terminal,
    /// 5xx/network errors retry up to `max_attempts` with full-jitter
    /// exponential backoff; body size is capped at `MAX_RESPONSE_SIZE`.
    async fn get_with_retry(&self, url: &str) -> Result<Vec<u8>> {
        let mut backoff = self.config.retry.backoff();
        loop {
            match self.get_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() => match backoff.next() {
                    Some(delay) => {
                        tracing::debug!(url, delay_ms = delay.as_millis() as u64, "retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout
            } else {
                ClientError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::REQUEST_TIMEOUT {
            return Err(ClientError::Timeout);
        }
        if !status.is_success() {
            return Err(ClientError::HttpError(status.as_u16()));
        }

        if let Some(len) = response.content_length() {
            if len as usize > MAX_RESPONSE_SIZE {
                return Err(ClientError::SizeExceeded { max: MAX_RESPONSE_SIZE });
            }
        }

        let bytes = response.bytes().await.map_err(|e| ClientError::NetworkError(e.to_string()))?;
        if bytes.len() > MAX_RESPONSE_SIZE {
            return Err(ClientError::SizeExceeded { max: MAX_RESPONSE_SIZE });
        }
        Ok(bytes.to_vec())
    }
}

fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}
