//! Persistence adapter: the interface contracts the engine expects of a
//! relational store.
//!
//! The engine does not dictate schema, only semantics: two narrow traits
//! (`ProviderStore`, `HealthStore`) that [`crate::registry::ProviderRegistry`]
//! and [`crate::health::HealthTracker`] are generic over, plus a sqlite
//! reference implementation of each using `sqlx`, mirroring the teacher's
//! `*Repository` structs (runtime `query_as`, no compile-time `query!` macro
//! so the crate builds without a live `DATABASE_URL`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::PersistenceError;
use crate::models::{HealthMetric, HealthSummary, Outcome, Provider};

/// Durable CRUD for installed providers (spec §4.8 `providers` table).
///
/// Installs, uninstalls, and enable/priority changes are atomic w.r.t. this
/// store per spec §4.8's transactional semantics note; each method here maps
/// to one statement (or one transaction in the sqlite implementation).
#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn insert(&self, provider: &Provider) -> Result<(), PersistenceError>;
    async fn update(&self, provider: &Provider) -> Result<(), PersistenceError>;
    async fn delete(&self, id: &str) -> Result<(), PersistenceError>;
    async fn get(&self, id: &str) -> Result<Option<Provider>, PersistenceError>;
    async fn list(&self) -> Result<Vec<Provider>, PersistenceError>;
}

/// Durable append-only health metrics plus a materialised summary view
/// (spec §4.8 `health_metric` / `health_summary` tables).
///
/// The in-memory [`crate::health::HealthTracker`] is authoritative for
/// scoring (recomputed on read, per spec §9); this store exists so history
/// survives a process restart and so `health_summary` can be joined against
/// `providers.name` for display by SQL consumers outside the engine.
#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn append_metric(&self, provider_id: &str, metric: &HealthMetric)
        -> Result<(), PersistenceError>;
    async fn upsert_summary(&self, summary: &HealthSummary) -> Result<(), PersistenceError>;
    async fn prune_older_than(
        &self,
        provider_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;
    async fn clear(&self, provider_id: &str) -> Result<(), PersistenceError>;
}

/// Sqlite-backed [`ProviderStore`] (spec §6.3 `providers` table layout).
pub struct SqliteProviderStore {
    pool: SqlitePool,
}

impl SqliteProviderStore {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderStore for SqliteProviderStore {
    async fn insert(&self, provider: &Provider) -> Result<(), PersistenceError> {
        let manifest_json = serde_json::to_string(&provider.manifest)
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        sqlx::query(
            r"
            INSERT INTO providers (id, base_url, manifest, enabled, priority, installed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&provider.id)
        .bind(&provider.base_url)
        .bind(manifest_json)
        .bind(provider.enabled)
        .bind(provider.priority)
        .bind(provider.installed_at)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from)?;
        Ok(())
    }

    async fn update(&self, provider: &Provider) -> Result<(), PersistenceError> {
        let manifest_json = serde_json::to_string(&provider.manifest)
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        sqlx::query(
            r"
            UPDATE providers
            SET base_url = ?, manifest = ?, enabled = ?, priority = ?
            WHERE id = ?
            ",
        )
        .bind(&provider.base_url)
        .bind(manifest_json)
        .bind(provider.enabled)
        .bind(provider.priority)
        .bind(&provider.id)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from)?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM providers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::from)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Provider>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM providers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PersistenceError::from)?;
        row.map(row_to_provider).transpose()
    }

    async fn list(&self) -> Result<Vec<Provider>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM providers ORDER BY priority DESC, installed_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(PersistenceError::from)?;
        rows.into_iter().map(row_to_provider).collect()
    }
}

fn row_to_provider(row: sqlx::sqlite::SqliteRow) -> Result<Provider, PersistenceError> {
    let manifest_json: String = row.try_get("manifest").map_err(PersistenceError::from)?;
    let manifest = serde_json::from_str(&manifest_json)
        .map_err(|e| PersistenceError::Database(format!("corrupt manifest blob: {e}")))?;
    Ok(Provider {
        id: row.try_get("id").map_err(PersistenceError::from)?,
        base_url: row.try_get("base_url").map_err(PersistenceError::from)?,
        manifest,
        enabled: row.try_get("enabled").map_err(PersistenceError::from)?,
        priority: row.try_get("priority").map_err(PersistenceError::from)?,
        installed_at: row.try_get("installed_at").map_err(PersistenceError::from)?,
    })
}

/// Sqlite-backed [`HealthStore`] (spec §6.3 `health_metric` / `health_summary`).
pub struct SqliteHealthStore {
    pool: SqlitePool,
}

impl SqliteHealthStore {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthStore for SqliteHealthStore {
    async fn append_metric(
        &self,
        provider_id: &str,
        metric: &HealthMetric,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r"
            INSERT INTO health_metric
                (provider_id, operation, latency_ms, outcome, detail, item_count, observed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(provider_id)
        .bind(metric.operation.as_str())
        .bind(metric.latency.as_millis() as i64)
        .bind(outcome_str(metric.outcome))
        .bind(&metric.detail)
        .bind(metric.item_count as i64)
        .bind(metric.observed_at)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from)?;
        Ok(())
    }

    async fn upsert_summary(&self, summary: &HealthSummary) -> Result<(), PersistenceError> {
        sqlx::query(
            r"
            INSERT INTO health_summary
                (provider_id, total, success, fail, mean_latency_ms, last_error, score, last_observed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider_id) DO UPDATE SET
                total = excluded.total,
                success = excluded.success,
                fail = excluded.fail,
                mean_latency_ms = excluded.mean_latency_ms,
                last_error = excluded.last_error,
                score = excluded.score,
                last_observed_at = excluded.last_observed_at
            ",
        )
        .bind(&summary.provider_id)
        .bind(summary.total as i64)
        .bind(summary.success as i64)
        .bind(summary.fail as i64)
        .bind(summary.mean_latency_ms)
        .bind(&summary.last_error)
        .bind(summary.score)
        .bind(summary.last_observed_at)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from)?;
        Ok(())
    }

    async fn prune_older_than(
        &self,
        provider_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM health_metric WHERE provider_id = ? AND observed_at < ?")
            .bind(provider_id)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::from)?;
        Ok(())
    }

    async fn clear(&self, provider_id: &str) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM health_metric WHERE provider_id = ?")
            .bind(provider_id)
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::from)?;
        sqlx::query("DELETE FROM health_summary WHERE provider_id = ?")
            .bind(provider_id)
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::from)?;
        Ok(())
    }
}

fn outcome_str(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Success => "success",
        Outcome::Empty => "empty",
        Outcome::HttpError => "http_error",
        Outcome::Timeout => "timeout",
        Outcome::ParseError => "parse_error",
        Outcome::NetworkError => "network_error",
    }
}

/// Create the tables a fresh sqlite database needs. A real
/// deployment would run this via a migration tool from the host binary;
/// exposed here so engine tests can stand up an in-memory database without
/// one.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), PersistenceError> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS providers (
            id TEXT PRIMARY KEY,
            base_url TEXT NOT NULL,
            manifest TEXT NOT NULL,
            enabled BOOLEAN NOT NULL,
            priority INTEGER NOT NULL,
            installed_at TIMESTAMP NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(PersistenceError::from)?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS health_metric (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            latency_ms INTEGER NOT NULL,
            outcome TEXT NOT NULL,
            detail TEXT,
            item_count INTEGER NOT NULL,
            observed_at TIMESTAMP NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(PersistenceError::from)?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_health_metric_provider ON health_metric(provider_id)")
        .execute(pool)
        .await
        .map_err(PersistenceError::from)?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS health_summary (
            provider_id TEXT PRIMARY KEY,
            total INTEGER NOT NULL,
            success INTEGER NOT NULL,
            fail INTEGER NOT NULL,
            mean_latency_ms REAL NOT NULL,
            last_error TEXT,
            score REAL NOT NULL,
            last_observed_at TIMESTAMP
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(PersistenceError::from)?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS addon_response_cache (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL,
            created_at TIMESTAMP NOT NULL,
            expires_at TIMESTAMP NOT NULL,
            provider_id TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(PersistenceError::from)?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cache_expires ON addon_response_cache(expires_at)",
    )
    .execute(pool)
    .await
    .map_err(PersistenceError::from)?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cache_provider ON addon_response_cache(provider_id)",
    )
    .execute(pool)
    .await
    .map_err(PersistenceError::from)?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS metadata_cache (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL,
            created_at TIMESTAMP NOT NULL,
            expires_at TIMESTAMP NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(PersistenceError::from)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use addon_client::{BehaviorHints, Manifest, MediaType, ResourceKind};

    async fn pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    fn sample_provider() -> Provider {
        Provider {
            id: "cinemeta".to_string(),
            base_url: "https://v3-cinemeta.strem.io".to_string(),
            manifest: Manifest {
                id: "cinemeta".to_string(),
                name: "Cinemeta".to_string(),
                version: "3.0.0".to_string(),
                description: "desc".to_string(),
                author: None,
                types: vec![MediaType::Movie],
                catalogs: vec![],
                resources: vec![ResourceKind::Meta],
                id_prefixes: vec![],
                behavior_hints: BehaviorHints::default(),
            },
            enabled: true,
            priority: 0,
            installed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let pool = pool().await;
        let store = SqliteProviderStore::new(pool);
        let provider = sample_provider();
        store.insert(&provider).await.unwrap();

        let fetched = store.get("cinemeta").await.unwrap().unwrap();
        assert_eq!(fetched.id, provider.id);
        assert_eq!(fetched.manifest.name, "Cinemeta");
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let pool = pool().await;
        let store = SqliteProviderStore::new(pool);
        let provider = sample_provider();
        store.insert(&provider).await.unwrap();
        assert!(store.insert(&provider).await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let pool = pool().await;
        let store = SqliteProviderStore::new(pool);
        let provider = sample_provider();
        store.insert(&provider).await.unwrap();
        store.delete("cinemeta").await.unwrap();
        assert!(store.get("cinemeta").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_orders_by_priority_desc_install_asc() {
        let pool = pool().await;
        let store = SqliteProviderStore::new(pool);
        let mut low = sample_provider();
        low.id = "low".to_string();
        low.priority = 0;
        let mut high = sample_provider();
        high.id = "high".to_string();
        high.priority = 10;
        store.insert(&low).await.unwrap();
        store.insert(&high).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all[0].id, "high");
        assert_eq!(all[1].id, "low");
    }

    #[tokio::test]
    async fn health_store_round_trips_a_summary() {
        let pool = pool().await;
        let store = SqliteHealthStore::new(pool);
        let summary = HealthSummary {
            provider_id: "p1".to_string(),
            display_name: None,
            total: 5,
            success: 5,
            fail: 0,
            mean_latency_ms: 120.0,
            last_error: None,
            score: 98.0,
            last_observed_at: Some(Utc::now()),
        };
        store.upsert_summary(&summary).await.unwrap();
        store.upsert_summary(&summary).await.unwrap();
        store.clear("p1").await.unwrap();
    }
}
