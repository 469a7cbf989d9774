//! Engine configuration.
//!
//! Defaults match the spec exactly; every field can be overridden by an
//! `ADDON_ENGINE__<SECTION>__<FIELD>` environment variable (e.g.
//! `ADDON_ENGINE__HTTP__PER_REQUEST_TIMEOUT_SECS=30`), layered over an optional
//! config file. The double underscore separates path segments from the
//! (possibly multi-word) field name, so fields like `per_request_timeout_secs`
//! still map to a single nested key instead of being split apart.

use std::time::Duration;

use config::{Config as ConfigSource, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use addon_client::{ClientConfig, RetryPolicy};

use crate::cache::CacheTtls;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub per_request_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { per_request_timeout_secs: 15, max_retries: 3, backoff_base_ms: 250 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    pub deadline_secs: u64,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self { deadline_secs: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    pub manifest_secs: u64,
    pub catalog_secs: u64,
    pub meta_secs: u64,
    pub stream_secs: u64,
    pub subtitles_secs: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            manifest_secs: 7 * 24 * 3600,
            catalog_secs: 3600,
            meta_secs: 24 * 3600,
            stream_secs: 300,
            subtitles_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub window_size: usize,
    pub window_duration_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { window_size: 200, window_duration_secs: 604_800 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlConfig {
    pub restricted_mode: bool,
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self { restricted_mode: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    pub default_enabled: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        // Open Question resolution (SPEC_FULL.md §4): default-enabled.
        Self { default_enabled: true }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub http: HttpConfig,
    pub aggregate: AggregateConfig,
    pub cache: CacheTtlConfig,
    pub health: HealthConfig,
    pub url: UrlConfig,
    pub install: InstallConfig,
}

impl EngineConfig {
    /// Load defaults, then an optional config file, then `ADDON_ENGINE__*`
    /// environment overrides, matching the teacher's `config`-crate layering.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigSource::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?);

        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("ADDON_ENGINE").separator("__").try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_secs(self.http.per_request_timeout_secs),
            retry: RetryPolicy::new(
                self.http.max_retries,
                Duration::from_millis(self.http.backoff_base_ms),
            ),
            restricted_mode: self.url.restricted_mode,
        }
    }

    #[must_use]
    pub fn cache_ttls(&self) -> CacheTtls {
        CacheTtls {
            manifest: Duration::from_secs(self.cache.manifest_secs),
            catalog: Duration::from_secs(self.cache.catalog_secs),
            stream: Duration::from_secs(self.cache.stream_secs),
            meta: Duration::from_secs(self.cache.meta_secs),
            subtitles: Duration::from_secs(self.cache.subtitles_secs),
        }
    }

    #[must_use]
    pub fn aggregate_deadline(&self) -> Duration {
        Duration::from_secs(self.aggregate.deadline_secs)
    }

    #[must_use]
    pub fn health_window_duration(&self) -> Duration {
        Duration::from_secs(self.health.window_duration_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_6_4() {
        let config = EngineConfig::default();
        assert_eq!(config.http.per_request_timeout_secs, 15);
        assert_eq!(config.aggregate.deadline_secs, 10);
        assert_eq!(config.http.max_retries, 3);
        assert_eq!(config.http.backoff_base_ms, 250);
        assert_eq!(config.health.window_size, 200);
        assert_eq!(config.health.window_duration_secs, 604_800);
        assert!(config.url.restricted_mode);
        assert!(config.install.default_enabled);
    }

    #[test]
    fn environment_override_takes_precedence() {
        std::env::set_var("ADDON_ENGINE__HTTP__MAX_RETRIES", "5");
        let config = EngineConfig::load(None).unwrap();
        assert_eq!(config.http.max_retries, 5);
        std::env::remove_var("ADDON_ENGINE__HTTP__MAX_RETRIES");
    }
}
