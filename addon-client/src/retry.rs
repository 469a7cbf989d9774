//! Retry policy for transport-level failures.
//!
//! A policy object rather than a loop with sleeps intermixing business
//! logic. [`RetryPolicy::backoff`] hands back the delay sequence; the loop
//! driving it lives in [`crate::client::ProtocolClient`].

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

/// Exponential backoff with full jitter, starting at `base` and doubling on
/// every attempt, capped at `max_attempts` retries: up to 3 on 5xx or a
/// network error, 250 ms base, full jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base: Duration::from_millis(250) }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self { max_attempts, base }
    }

    /// The delay sequence for a fresh attempt run: one `Duration` per retry,
    /// doubling from `base` and capped at `max_attempts` items. Consumed with
    /// `.next()` once per failed, retryable attempt — once it yields `None`
    /// the retry budget is spent.
    #[must_use]
    pub fn backoff(&self) -> impl Iterator<Item = Duration> + Send + 'static {
        ExponentialBuilder::default()
            .with_min_delay(self.base)
            .with_factor(2.0)
            .with_max_times(self.max_attempts as usize)
            .with_jitter()
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_after_max_attempts() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = policy.backoff().collect();
        assert_eq!(delays.len(), policy.max_attempts as usize);
    }

    #[test]
    fn delay_never_exceeds_exponential_ceiling() {
        let policy = RetryPolicy::default();
        let ceilings = (0..policy.max_attempts)
            .map(|attempt| policy.base.as_millis() as u64 * (1u64 << attempt));
        for (delay, ceiling) in policy.backoff().zip(ceilings) {
            assert!(delay.as_millis() as u64 <= ceiling);
        }
    }
}
