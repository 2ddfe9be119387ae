//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so coordinators, the statestream task and the HTTP endpoint
//! never contend on a lock. Monotonic counters feed Prometheus; the API
//! latency max is reset on every `report()`.
//!
//! All atomics use Relaxed ordering: these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Lock-free metrics collector shared by all journeys
pub struct Metrics {
    /// Update cycles executed (monotonic)
    refreshes_total: AtomicU64,
    /// Forced refreshes requested by state changes (monotonic)
    forced_refreshes_total: AtomicU64,
    /// Debounced refresh requests (monotonic)
    debounced_requests_total: AtomicU64,
    /// Debounced requests folded into a pending refresh (monotonic)
    coalesced_requests_total: AtomicU64,
    /// Update cycles that failed (monotonic)
    update_failures_total: AtomicU64,
    /// Updates short-circuited because origin == destination (monotonic)
    stationary_total: AtomicU64,
    /// Routing API calls (monotonic)
    api_calls_total: AtomicU64,
    /// Routing API calls that returned an error (monotonic)
    api_errors_total: AtomicU64,
    /// Sum of API call latencies in milliseconds (monotonic)
    api_latency_sum_ms: AtomicU64,
    /// Max API call latency in milliseconds (reset on report)
    api_latency_max_ms: AtomicU64,
    /// Statestream messages applied to the state store (monotonic)
    state_updates_total: AtomicU64,
    /// Statestream messages ignored or malformed (monotonic)
    state_updates_ignored_total: AtomicU64,
    start_time: Instant,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub refreshes_total: u64,
    pub forced_refreshes_total: u64,
    pub debounced_requests_total: u64,
    pub coalesced_requests_total: u64,
    pub update_failures_total: u64,
    pub stationary_total: u64,
    pub api_calls_total: u64,
    pub api_errors_total: u64,
    pub api_latency_avg_ms: u64,
    pub api_latency_max_ms: u64,
    pub state_updates_total: u64,
    pub state_updates_ignored_total: u64,
    pub uptime_secs: u64,
}

impl MetricsSummary {
    /// Log the summary as one structured line
    pub fn log(&self) {
        info!(
            refreshes = %self.refreshes_total,
            forced = %self.forced_refreshes_total,
            debounced = %self.debounced_requests_total,
            coalesced = %self.coalesced_requests_total,
            failures = %self.update_failures_total,
            stationary = %self.stationary_total,
            api_calls = %self.api_calls_total,
            api_errors = %self.api_errors_total,
            api_avg_ms = %self.api_latency_avg_ms,
            api_max_ms = %self.api_latency_max_ms,
            state_updates = %self.state_updates_total,
            uptime_secs = %self.uptime_secs,
            "metrics_summary"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            refreshes_total: AtomicU64::new(0),
            forced_refreshes_total: AtomicU64::new(0),
            debounced_requests_total: AtomicU64::new(0),
            coalesced_requests_total: AtomicU64::new(0),
            update_failures_total: AtomicU64::new(0),
            stationary_total: AtomicU64::new(0),
            api_calls_total: AtomicU64::new(0),
            api_errors_total: AtomicU64::new(0),
            api_latency_sum_ms: AtomicU64::new(0),
            api_latency_max_ms: AtomicU64::new(0),
            state_updates_total: AtomicU64::new(0),
            state_updates_ignored_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_refresh(&self) {
        self.refreshes_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_forced_refresh(&self) {
        self.forced_refreshes_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_debounced_request(&self, coalesced: bool) {
        self.debounced_requests_total.fetch_add(1, Ordering::Relaxed);
        if coalesced {
            self.coalesced_requests_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_update_failure(&self) {
        self.update_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stationary(&self) {
        self.stationary_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one routing API call and its latency
    #[inline]
    pub fn record_api_call(&self, latency_ms: u64, ok: bool) {
        self.api_calls_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.api_errors_total.fetch_add(1, Ordering::Relaxed);
        }
        self.api_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        update_atomic_max(&self.api_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_state_update(&self) {
        self.state_updates_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_state_update_ignored(&self) {
        self.state_updates_ignored_total.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self, api_latency_max_ms: u64) -> MetricsSummary {
        let api_calls_total = self.api_calls_total.load(Ordering::Relaxed);
        let latency_sum = self.api_latency_sum_ms.load(Ordering::Relaxed);
        MetricsSummary {
            refreshes_total: self.refreshes_total.load(Ordering::Relaxed),
            forced_refreshes_total: self.forced_refreshes_total.load(Ordering::Relaxed),
            debounced_requests_total: self.debounced_requests_total.load(Ordering::Relaxed),
            coalesced_requests_total: self.coalesced_requests_total.load(Ordering::Relaxed),
            update_failures_total: self.update_failures_total.load(Ordering::Relaxed),
            stationary_total: self.stationary_total.load(Ordering::Relaxed),
            api_calls_total,
            api_errors_total: self.api_errors_total.load(Ordering::Relaxed),
            api_latency_avg_ms: latency_sum.checked_div(api_calls_total).unwrap_or(0),
            api_latency_max_ms,
            state_updates_total: self.state_updates_total.load(Ordering::Relaxed),
            state_updates_ignored_total: self.state_updates_ignored_total.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Snapshot for the periodic log line; resets the latency max
    pub fn report(&self) -> MetricsSummary {
        let max = self.api_latency_max_ms.swap(0, Ordering::Relaxed);
        self.summary(max)
    }

    /// Snapshot without resetting anything (Prometheus scrapes)
    pub fn snapshot(&self) -> MetricsSummary {
        self.summary(self.api_latency_max_ms.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_latency_tracking() {
        let metrics = Metrics::new();
        metrics.record_api_call(100, true);
        metrics.record_api_call(300, false);

        let summary = metrics.report();
        assert_eq!(summary.api_calls_total, 2);
        assert_eq!(summary.api_errors_total, 1);
        assert_eq!(summary.api_latency_avg_ms, 200);
        assert_eq!(summary.api_latency_max_ms, 300);

        // Max resets on report, totals do not
        let summary = metrics.report();
        assert_eq!(summary.api_latency_max_ms, 0);
        assert_eq!(summary.api_calls_total, 2);
    }

    #[test]
    fn test_snapshot_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_api_call(50, true);
        assert_eq!(metrics.snapshot().api_latency_max_ms, 50);
        assert_eq!(metrics.snapshot().api_latency_max_ms, 50);
    }

    #[test]
    fn test_debounced_counters() {
        let metrics = Metrics::new();
        metrics.record_debounced_request(false);
        metrics.record_debounced_request(true);
        metrics.record_debounced_request(true);

        let summary = metrics.snapshot();
        assert_eq!(summary.debounced_requests_total, 3);
        assert_eq!(summary.coalesced_requests_total, 2);
    }

    #[test]
    fn test_empty_average() {
        let metrics = Metrics::new();
        assert_eq!(metrics.report().api_latency_avg_ms, 0);
    }
}
