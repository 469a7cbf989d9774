//! Health tracker: rolling per-provider metrics and derived score.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use addon_client::ResourceKind;

use crate::models::{HealthMetric, HealthSummary, Outcome};

/// Observes every operation attempted against every provider and derives a
/// `[0, 100]` reliability score.
///
/// Per-provider buffers are append-only ring windows guarded by their own
/// `parking_lot::Mutex`, consistent with spec §5's "health tracker uses
/// per-provider append-only buffers; writes are non-blocking".
pub struct HealthTracker {
    windows: DashMap<String, Mutex<VecDeque<HealthMetric>>>,
    window_size: usize,
    window_duration: Duration,
}

impl HealthTracker {
    #[must_use]
    pub fn new(window_size: usize, window_duration: Duration) -> Self {
        Self { windows: DashMap::new(), window_size, window_duration }
    }

    /// `record(provider_id, operation, latency, outcome, detail?, item_count?)`
    ///: fire-and-forget, never awaits.
    pub fn record(
        &self,
        provider_id: &str,
        operation: ResourceKind,
        latency: Duration,
        outcome: Outcome,
        detail: Option<String>,
        item_count: usize,
    ) {
        let metric = HealthMetric {
            provider_id: provider_id.to_string(),
            operation,
            latency,
            outcome,
            detail,
            item_count,
            observed_at: Utc::now(),
        };

        let window = self.windows.entry(provider_id.to_string()).or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut guard = window.lock();
        guard.push_back(metric);
        self.prune(&mut guard);
        tracing::debug!(provider_id, ?outcome, latency_ms = latency.as_millis() as u64, "health metric recorded");
    }

    fn prune(&self, window: &mut VecDeque<HealthMetric>) {
        while window.len() > self.window_size {
            window.pop_front();
        }
        let Ok(max_age) = ChronoDuration::from_std(self.window_duration) else { return };
        let cutoff = Utc::now() - max_age;
        while window.front().is_some_and(|m| m.observed_at < cutoff) {
            window.pop_front();
        }
    }

    /// `summary(provider_id) -> HealthSummary`: recomputed on
    /// every read per spec §9 "Health scoring ... MUST recompute on read to
    /// avoid staleness drift".
    #[must_use]
    pub fn summary(&self, provider_id: &str) -> HealthSummary {
        let Some(window) = self.windows.get(provider_id) else {
            return empty_summary(provider_id);
        };
        let guard = window.lock();
        compute_summary(provider_id, &guard)
    }

    /// `summaries() -> list<HealthSummary>` joined with provider display names.
    #[must_use]
    pub fn summaries(&self, display_names: &HashMap<String, String>) -> Vec<HealthSummary> {
        self.windows
            .iter()
            .map(|entry| {
                let mut summary = compute_summary(entry.key(), &entry.value().lock());
                summary.display_name = display_names.get(entry.key()).cloned();
                summary
            })
            .collect()
    }

    /// `clear(provider_id)`: on uninstall.
    pub fn clear(&self, provider_id: &str) {
        self.windows.remove(provider_id);
    }
}

fn empty_summary(provider_id: &str) -> HealthSummary {
    HealthSummary {
        provider_id: provider_id.to_string(),
        display_name: None,
        total: 0,
        success: 0,
        fail: 0,
        mean_latency_ms: 0.0,
        last_error: None,
        score: 100.0,
        last_observed_at: None,
    }
}

fn compute_summary(provider_id: &str, window: &VecDeque<HealthMetric>) -> HealthSummary {
    if window.is_empty() {
        return empty_summary(provider_id);
    }

    let total = window.len() as u64;
    let mut success = 0u64;
    let mut fail = 0u64;
    let mut latencies_ms: Vec<f64> = Vec::with_capacity(window.len());
    let mut total_latency_ms = 0.0;
    let mut last_error: Option<String> = None;
    let mut success_item_counts: Vec<usize> = Vec::new();

    for metric in window {
        let latency_ms = metric.latency.as_secs_f64() * 1000.0;
        latencies_ms.push(latency_ms);
        total_latency_ms += latency_ms;
        if metric.outcome.is_failure() {
            fail += 1;
            last_error = metric.detail.clone().or(last_error);
        } else {
            success += 1;
            if metric.outcome == Outcome::Success {
                success_item_counts.push(metric.item_count);
            }
        }
    }

    let mean_latency_ms = total_latency_ms / total as f64;

    let mut score = 100.0f64;

    let failure_rate = fail as f64 / total.max(1) as f64;
    score -= 40.0 * failure_rate;

    let p95 = percentile(&latencies_ms, 0.95);
    let latency_penalty = ((p95 - 500.0) / (5000.0 - 500.0)).clamp(0.0, 1.0) * 30.0;
    score -= latency_penalty;

    // window is push_back-ordered, so `back()` is the most recently recorded call.
    if let Some(last) = window.back() {
        let recency_cutoff = Utc::now() - ChronoDuration::minutes(5);
        if last.outcome.is_failure() && last.observed_at >= recency_cutoff {
            score -= 20.0;
        }
    }

    if !success_item_counts.is_empty() {
        let mean_items =
            success_item_counts.iter().sum::<usize>() as f64 / success_item_counts.len() as f64;
        if mean_items >= 5.0 {
            score += 10.0;
        }
    }

    HealthSummary {
        provider_id: provider_id.to_string(),
        display_name: None,
        total,
        success,
        fail,
        mean_latency_ms,
        last_error,
        score: score.clamp(0.0, 100.0),
        last_observed_at: window.back().map(|m| m.observed_at),
    }
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (p * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> HealthTracker {
        HealthTracker::new(200, Duration::from_secs(604_800))
    }

    #[test]
    fn no_history_yields_the_baseline_score() {
        let tracker = tracker();
        let summary = tracker.summary("unknown-provider");
        assert_eq!(summary.total, 0);
        assert!((summary.score - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn a_success_only_window_scores_at_or_near_the_ceiling() {
        let tracker = tracker();
        for _ in 0..10 {
            tracker.record(
                "p1",
                ResourceKind::Stream,
                Duration::from_millis(100),
                Outcome::Success,
                None,
                3,
            );
        }
        let summary = tracker.summary("p1");
        assert_eq!(summary.total, 10);
        assert_eq!(summary.fail, 0);
        assert!(summary.score > 95.0, "score was {}", summary.score);
    }

    #[test]
    fn recent_failures_depress_the_score() {
        let tracker = tracker();
        for _ in 0..10 {
            tracker.record(
                "p1",
                ResourceKind::Stream,
                Duration::from_millis(100),
                Outcome::HttpError,
                Some("500".to_string()),
                0,
            );
        }
        let summary = tracker.summary("p1");
        assert_eq!(summary.fail, 10);
        assert!(summary.score < 50.0, "score was {}", summary.score);
    }

    #[test]
    fn empty_outcomes_do_not_count_as_failures() {
        let tracker = tracker();
        for _ in 0..5 {
            tracker.record("p1", ResourceKind::Catalog, Duration::from_millis(50), Outcome::Empty, None, 0);
        }
        let summary = tracker.summary("p1");
        assert_eq!(summary.fail, 0);
        assert_eq!(summary.success, 5);
    }

    #[test]
    fn one_extra_success_never_lowers_the_score() {
        let tracker = tracker();
        for _ in 0..5 {
            tracker.record("p1", ResourceKind::Meta, Duration::from_millis(200), Outcome::Success, None, 2);
        }
        let before = tracker.summary("p1").score;
        tracker.record("p1", ResourceKind::Meta, Duration::from_millis(200), Outcome::Success, None, 2);
        let after = tracker.summary("p1").score;
        assert!(after >= before, "before={before} after={after}");
    }

    #[test]
    fn one_extra_http_error_never_raises_the_score() {
        let tracker = tracker();
        for _ in 0..5 {
            tracker.record("p1", ResourceKind::Meta, Duration::from_millis(200), Outcome::Success, None, 2);
        }
        let before = tracker.summary("p1").score;
        tracker.record(
            "p1",
            ResourceKind::Meta,
            Duration::from_millis(200),
            Outcome::HttpError,
            Some("boom".to_string()),
            0,
        );
        let after = tracker.summary("p1").score;
        assert!(after <= before, "before={before} after={after}");
    }

    #[test]
    fn window_size_is_enforced() {
        let tracker = HealthTracker::new(5, Duration::from_secs(604_800));
        for _ in 0..20 {
            tracker.record("p1", ResourceKind::Stream, Duration::from_millis(10), Outcome::Success, None, 1);
        }
        let summary = tracker.summary("p1");
        assert_eq!(summary.total, 5);
    }

    #[test]
    fn clear_removes_all_history_for_a_provider() {
        let tracker = tracker();
        tracker.record("p1", ResourceKind::Stream, Duration::from_millis(10), Outcome::Success, None, 1);
        tracker.clear("p1");
        assert_eq!(tracker.summary("p1").total, 0);
    }
}
