//! Wire types for the addon HTTP protocol
//!
//! These are the engine's *internal* normalised types. Per §9 ("JSON
//! variability on the wire ... normalise at the parser boundary ... never
//! leak raw JSON above §4.2"), every provider response is deserialised
//! straight into these structs; nothing above this crate sees `serde_json::Value`.

use serde::{Deserialize, Serialize};

/// Media type a catalog/stream/meta call is scoped to.
///
/// `Unknown` is accepted from the wire (forward compatibility) but is never
/// dispatched on by the aggregator — see spec §9 "Sum-type on media kind".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
    Channel,
    #[serde(rename = "tv")]
    Tv,
    #[serde(other)]
    Unknown,
}

impl MediaType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
            MediaType::Channel => "channel",
            MediaType::Tv => "tv",
            MediaType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource kinds a provider can declare support for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Catalog,
    Stream,
    Meta,
    Subtitles,
    AddonCatalog,
    #[serde(other)]
    Unknown,
}

impl ResourceKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Catalog => "catalog",
            ResourceKind::Stream => "stream",
            ResourceKind::Meta => "meta",
            ResourceKind::Subtitles => "subtitles",
            ResourceKind::AddonCatalog => "addon_catalog",
            ResourceKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavior hints a provider declares at the manifest level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorHints {
    #[serde(default)]
    pub adult: bool,
    #[serde(default)]
    pub p2p: bool,
}

/// One "extra" parameter a catalog accepts (spec §3 CatalogDescriptor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraField {
    pub name: String,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub options_limit: Option<u32>,
}

/// A catalog a provider declares in its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDescriptor {
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub extra: Vec<ExtraField>,
}

/// A validated provider manifest. Always constructed by
/// [`crate::manifest::validate_manifest`]; there is no public constructor
/// that skips validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: Option<String>,
    #[serde(default)]
    pub types: Vec<MediaType>,
    #[serde(default)]
    pub catalogs: Vec<CatalogDescriptor>,
    #[serde(default)]
    pub resources: Vec<ResourceKind>,
    #[serde(default)]
    pub id_prefixes: Vec<String>,
    #[serde(default)]
    pub behavior_hints: BehaviorHints,
}

impl Manifest {
    #[must_use]
    pub fn supports_resource(&self, kind: &ResourceKind) -> bool {
        self.resources.contains(kind)
    }

    #[must_use]
    pub fn catalog(&self, media_type: &MediaType, catalog_id: &str) -> Option<&CatalogDescriptor> {
        self.catalogs
            .iter()
            .find(|c| &c.media_type == media_type && c.id == catalog_id)
    }
}

/// Poster aspect-ratio hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosterShape {
    Poster,
    Landscape,
    Square,
}

/// Minimal catalog-listing representation of a media item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaPreview {
    pub id: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub name: String,
    #[serde(default)]
    pub poster: Option<String>,
    #[serde(default, rename = "posterShape")]
    pub poster_shape: Option<PosterShape>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "releaseInfo")]
    pub release_info: Option<String>,
    #[serde(default, rename = "imdbRating")]
    pub imdb_rating: Option<f32>,
}

/// One episode of a series. The `id` field is the composite
/// `seriesId:season:episode` form built by [`crate::validate::build_episode_id`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub season: u32,
    pub episode: u32,
    pub title: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default, rename = "releaseInfo")]
    pub release_info: Option<String>,
}

/// Full metadata for a movie/series/channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaItem {
    #[serde(flatten)]
    pub preview: MetaPreview,
    #[serde(default)]
    pub director: Vec<String>,
    #[serde(default)]
    pub cast: Vec<String>,
    #[serde(default)]
    pub writer: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub awards: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub trailers: Vec<String>,
    #[serde(default, rename = "videos")]
    pub episodes: Vec<Episode>,
}

/// Behavior hints on a single stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamBehaviorHints {
    #[serde(default, rename = "notWebReady")]
    pub not_web_ready: bool,
    #[serde(default, rename = "bingeGroup")]
    pub binge_group: Option<String>,
    #[serde(default, rename = "countryWhitelist")]
    pub country_whitelist: Option<Vec<String>>,
}

/// A subtitle track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtitle {
    pub id: String,
    pub lang: String,
    pub url: String,
}

/// A playable stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "behaviorHints")]
    pub behavior_hints: StreamBehaviorHints,
    #[serde(default)]
    pub subtitles: Vec<Subtitle>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogResponse {
    #[serde(default)]
    pub metas: Vec<MetaPreview>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamResponse {
    #[serde(default)]
    pub streams: Vec<Stream>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaResponse {
    pub meta: MetaItem,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubtitleResponse {
    #[serde(default)]
    pub subtitles: Vec<Subtitle>,
}
