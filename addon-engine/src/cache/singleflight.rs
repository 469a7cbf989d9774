//! Single-flight cache stampede protection.
//!
//! Wraps `async_singleflight` so that concurrent misses on the same
//! `(kind, key)` collapse into one upstream call whose result is broadcast to
//! every waiter, rather than each waiter independently calling the provider.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Error type for [`SingleFlight`] operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SingleFlightError<E> {
    /// The leader task panicked or was dropped before producing a result.
    #[error("single-flight worker failed - leader dropped or panicked")]
    WorkerFailed,
    #[error("{0}")]
    Inner(E),
}

/// Collapses concurrent calls for the same key into a single execution.
#[derive(Clone)]
pub struct SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    group: Arc<async_singleflight::Group<K, V, E>>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { group: Arc::new(async_singleflight::Group::new()) }
    }

    /// Run `f` at most once for `key`; concurrent callers for the same key
    /// receive the same result without re-running `f`.
    pub async fn do_work<Fut>(&self, key: K, f: Fut) -> Result<V, SingleFlightError<E>>
    where
        Fut: std::future::Future<Output = Result<V, E>> + Send,
    {
        self.group.work(&key, f).await.map_err(|opt_err| match opt_err {
            Some(inner) => SingleFlightError::Inner(inner),
            None => SingleFlightError::WorkerFailed,
        })
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
