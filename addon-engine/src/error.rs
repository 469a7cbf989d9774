//! Error taxonomy for the engine crate.

use thiserror::Error;

use addon_client::{ClientError, ManifestError, ResourceKind};

/// Errors from [`crate::registry::ProviderRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("provider `{0}` is already installed")]
    AlreadyInstalled(String),

    #[error("provider `{0}` not found")]
    NotFound(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(#[from] ManifestError),

    #[error("transport error while installing: {0}")]
    Transport(#[from] ClientError),

    #[error("persistence error: {0}")]
    PersistenceError(String),
}

/// Errors from [`crate::aggregator::Aggregator`] (spec §7 "Total-failure",
/// "No-providers").
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("no eligible providers declare resource `{0}`")]
    NoProviders(ResourceKind),

    #[error("all providers failed: {0:?}")]
    AllFailed(std::collections::HashMap<String, String>),
}

/// Top-level error returned by [`crate::engine::Engine`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<PersistenceError> for RegistryError {
    fn from(e: PersistenceError) -> Self {
        RegistryError::PersistenceError(e.to_string())
    }
}

/// Errors from the persistence contract.
///
/// Mirrors `sqlx::Error` mapping by row-existence and constraint-code, so a
/// `ProviderStore` implementation backed by any relational engine reports the
/// same shape upward.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => PersistenceError::NotFound("no matching row".to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    // SQLite unique constraint
                    "2067" | "1555" => {
                        PersistenceError::AlreadyExists(db_err.message().to_string())
                    }
                    _ => PersistenceError::Database(err.to_string()),
                }
            }
            _ => PersistenceError::Database(err.to_string()),
        }
    }
}
