//! Dispatch Metrics
//!
//! Lock-free counters for the dispatch layer:
//! - Request outcomes (total, succeeded, failed, cache hits)
//! - Per-provider usage (invocations, successes, failures, timeouts)
//! - Latency distribution of successful requests
//! - Accumulated provider cost

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

/// Cost is accumulated in millionths of a unit so it fits an atomic integer
const COST_SCALE: f64 = 1_000_000.0;

// ============================================================================
// Primitives
// ============================================================================

/// A monotonically increasing counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a zeroed counter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one, returning the previous value
    pub fn inc(&self) -> u64 {
        self.value.fetch_add(1, Ordering::Relaxed)
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A latency histogram with fixed buckets (milliseconds)
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<u64>,
    counts: Vec<AtomicU64>,
    total_count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Create a histogram with the given upper bounds
    pub fn new(buckets: Vec<u64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total_count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Buckets suited to model latency
    pub fn latency_default() -> Self {
        Self::new(vec![
            10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000,
        ])
    }

    /// Record one value
    pub fn record(&self, value: u64) {
        let index = self
            .buckets
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.buckets.len().saturating_sub(1));
        if let Some(count) = self.counts.get(index) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    /// Number of recorded values
    pub fn count(&self) -> u64 {
        self.total_count.load(Ordering::Relaxed)
    }

    /// Mean of recorded values
    pub fn mean(&self) -> f64 {
        let total = self.count();
        if total == 0 {
            return 0.0;
        }
        self.sum.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Largest recorded value
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    /// Upper bound of the bucket holding the `p` quantile
    pub fn percentile(&self, p: f64) -> u64 {
        let total = self.count();
        if total == 0 {
            return 0;
        }
        let target = ((total as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0u64;
        for (bound, count) in self.buckets.iter().zip(&self.counts) {
            cumulative += count.load(Ordering::Relaxed);
            if cumulative >= target {
                return *bound;
            }
        }
        self.buckets.last().copied().unwrap_or(0)
    }
}

// ============================================================================
// Per-Provider Usage
// ============================================================================

/// Usage counters for one provider
#[derive(Debug, Default)]
pub struct ProviderUsage {
    /// Invocations started
    pub invocations: Counter,
    /// Invocations that produced a valid reply
    pub successes: Counter,
    /// Invocations that failed (timeouts included)
    pub failures: Counter,
    /// Invocations that timed out
    pub timeouts: Counter,
}

/// Serializable view of [`ProviderUsage`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProviderUsageSnapshot {
    /// Invocations started
    pub invocations: u64,
    /// Valid replies
    pub successes: u64,
    /// Failures, timeouts included
    pub failures: u64,
    /// Timeouts
    pub timeouts: u64,
}

impl ProviderUsage {
    fn snapshot(&self) -> ProviderUsageSnapshot {
        ProviderUsageSnapshot {
            invocations: self.invocations.get(),
            successes: self.successes.get(),
            failures: self.failures.get(),
            timeouts: self.timeouts.get(),
        }
    }
}

// ============================================================================
// Dispatch Metrics
// ============================================================================

/// Aggregate metrics for a dispatcher
#[derive(Debug)]
pub struct DispatchMetrics {
    /// Requests received
    pub total_requests: Counter,
    /// Requests answered (cache hits included)
    pub successful_requests: Counter,
    /// Requests that failed
    pub failed_requests: Counter,
    /// Requests answered from the cache
    pub cache_hits: Counter,
    /// Cache lookups that missed
    pub cache_misses: Counter,
    /// Retry rounds started after the first
    pub retry_rounds: Counter,
    /// Latency of successful provider-served requests
    pub latency: Histogram,

    cost_micros: AtomicU64,
    providers: DashMap<String, Arc<ProviderUsage>>,
    started_at: Instant,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self {
            total_requests: Counter::new(),
            successful_requests: Counter::new(),
            failed_requests: Counter::new(),
            cache_hits: Counter::new(),
            cache_misses: Counter::new(),
            retry_rounds: Counter::new(),
            latency: Histogram::latency_default(),
            cost_micros: AtomicU64::new(0),
            providers: DashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Usage counters for a provider, created on first use
    pub fn provider(&self, name: &str) -> Arc<ProviderUsage> {
        if let Some(usage) = self.providers.get(name) {
            return Arc::clone(usage.value());
        }
        Arc::clone(
            self.providers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ProviderUsage::default()))
                .value(),
        )
    }

    /// Count an incoming request, returning its 0-based sequence number
    pub fn record_request(&self) -> u64 {
        self.total_requests.inc()
    }

    /// Count a cache hit
    pub fn record_cache_hit(&self) {
        self.cache_hits.inc();
        self.successful_requests.inc();
    }

    /// Count a cache miss
    pub fn record_cache_miss(&self) {
        self.cache_misses.inc();
    }

    /// Count an invocation about to start
    pub fn record_invocation(&self, provider: &str) {
        self.provider(provider).invocations.inc();
    }

    /// Count a successful invocation and the request it answered
    pub fn record_success(&self, provider: &str, latency_ms: u64, cost_per_unit: f64) {
        self.provider(provider).successes.inc();
        self.successful_requests.inc();
        self.latency.record(latency_ms);
        let micros = (cost_per_unit.max(0.0) * COST_SCALE).round() as u64;
        self.cost_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Count a failed invocation
    pub fn record_attempt_failure(&self, provider: &str, is_timeout: bool) {
        let usage = self.provider(provider);
        usage.failures.inc();
        if is_timeout {
            usage.timeouts.inc();
        }
    }

    /// Count a request that no provider could answer
    pub fn record_request_failure(&self) {
        self.failed_requests.inc();
    }

    /// Count a retry round
    pub fn record_retry_round(&self) {
        self.retry_rounds.inc();
    }

    /// Time since the metrics were created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Accumulated provider cost
    pub fn total_cost(&self) -> f64 {
        self.cost_micros.load(Ordering::Relaxed) as f64 / COST_SCALE
    }

    /// Point-in-time summary
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total_requests.get();
        let hits = self.cache_hits.get();
        let lookups = hits + self.cache_misses.get();

        let per_provider_usage = self
            .providers
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect();

        MetricsSnapshot {
            total_requests,
            successful_requests: self.successful_requests.get(),
            failed_requests: self.failed_requests.get(),
            cache_hits: hits,
            retry_rounds: self.retry_rounds.get(),
            per_provider_usage,
            average_latency_ms: self.latency.mean(),
            p50_latency_ms: self.latency.percentile(0.5),
            p99_latency_ms: self.latency.percentile(0.99),
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            total_cost: self.total_cost(),
            cost_per_request: if total_requests == 0 {
                0.0
            } else {
                self.total_cost() / total_requests as f64
            },
            uptime_seconds: self.uptime().as_secs(),
        }
    }

    /// Export in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        output.push_str(&format!(
            "# HELP switchyard_requests_total Requests received\n\
             # TYPE switchyard_requests_total counter\n\
             switchyard_requests_total {}\n\n",
            snapshot.total_requests
        ));
        output.push_str(&format!(
            "# HELP switchyard_requests_failed_total Requests no provider answered\n\
             # TYPE switchyard_requests_failed_total counter\n\
             switchyard_requests_failed_total {}\n\n",
            snapshot.failed_requests
        ));
        output.push_str(&format!(
            "# HELP switchyard_cache_hits_total Requests served from cache\n\
             # TYPE switchyard_cache_hits_total counter\n\
             switchyard_cache_hits_total {}\n\n",
            snapshot.cache_hits
        ));

        let mut providers: Vec<_> = snapshot.per_provider_usage.iter().collect();
        providers.sort_by(|a, b| a.0.cmp(b.0));
        if !providers.is_empty() {
            output.push_str(
                "# HELP switchyard_provider_invocations_total Invocations per provider\n\
                 # TYPE switchyard_provider_invocations_total counter\n",
            );
            for (name, usage) in &providers {
                output.push_str(&format!(
                    "switchyard_provider_invocations_total{{provider=\"{name}\",outcome=\"success\"}} {}\n\
                     switchyard_provider_invocations_total{{provider=\"{name}\",outcome=\"failure\"}} {}\n\
                     switchyard_provider_invocations_total{{provider=\"{name}\",outcome=\"timeout\"}} {}\n",
                    usage.successes, usage.failures, usage.timeouts
                ));
            }
        }

        output
    }
}

/// Serializable summary of [`DispatchMetrics`]
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Requests received
    pub total_requests: u64,
    /// Requests answered
    pub successful_requests: u64,
    /// Requests that failed
    pub failed_requests: u64,
    /// Requests answered from the cache
    pub cache_hits: u64,
    /// Retry rounds after the first
    pub retry_rounds: u64,
    /// Usage per provider
    pub per_provider_usage: HashMap<String, ProviderUsageSnapshot>,
    /// Mean latency of provider-served successes
    pub average_latency_ms: f64,
    /// Median latency bucket
    pub p50_latency_ms: u64,
    /// 99th percentile latency bucket
    pub p99_latency_ms: u64,
    /// Share of cache lookups that hit
    pub cache_hit_rate: f64,
    /// Accumulated provider cost
    pub total_cost: f64,
    /// `total_cost / total_requests`
    pub cost_per_request: f64,
    /// Seconds since creation
    pub uptime_seconds: u64,
}
