//! Pure HTTP protocol client for addon federation.
//!
//! This crate has no notion of providers, caching, health, or ranking — it
//! knows how to talk to exactly one addon's HTTP surface and validate what
//! comes back. The engine crate builds the rest on top.

pub mod client;
pub mod error;
pub mod manifest;
pub mod retry;
pub mod types;
pub mod validate;

pub use client::{ClientConfig, ProtocolClient};
pub use error::{ClientError, ManifestError, Result};
pub use manifest::validate_manifest;
pub use retry::RetryPolicy;
pub use types::{
    BehaviorHints, CatalogDescriptor, CatalogResponse, Episode, ExtraField, Manifest, MediaType,
    MetaItem, MetaPreview, MetaResponse, PosterShape, ResourceKind, Stream, StreamBehaviorHints,
    StreamResponse, Subtitle, SubtitleResponse,
};
