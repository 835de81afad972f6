//! Provider Health Monitoring
//!
//! Rolling per-provider statistics and the health tiers derived from them:
//! - A bounded window of `(latency, success)` samples per provider
//! - Lifetime request/success/failure counters
//! - Health tiers (`unknown`, `healthy`, `degraded`, `unhealthy`)
//! - Resolvable alerts for error rate, latency and availability
//!
//! Health is a soft signal. An `unhealthy` provider is moved to the back of
//! the ordering but stays a candidate; only an open circuit excludes it.
//!
//! # Thread Safety
//!
//! Each provider's window sits behind its own `parking_lot::Mutex`, so
//! updates for different providers never contend. The provider map is a
//! `DashMap` populated at construction.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::config::ProviderProfile;

// ============================================================================
// Health Status
// ============================================================================

/// Health tier of a provider
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No samples yet
    #[default]
    Unknown,

    /// Within all thresholds
    Healthy,

    /// Elevated latency or moderate error rate
    Degraded,

    /// High error rate or a run of consecutive failures
    Unhealthy,
}

impl HealthStatus {
    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Health Configuration
// ============================================================================

/// Thresholds for health tiers and alerts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Samples kept per provider
    pub window_size: usize,

    /// Samples required before the error rate can mark a provider unhealthy
    pub min_samples: usize,

    /// Error rate at which a provider is degraded (0.0 - 1.0)
    pub degraded_error_rate: f64,

    /// Error rate at which a provider is unhealthy (0.0 - 1.0)
    pub unhealthy_error_rate: f64,

    /// Average latency at which a provider is degraded
    pub degraded_latency_ms: u64,

    /// Consecutive failures at which a provider is unhealthy
    pub unhealthy_consecutive_failures: u32,

    /// Resolved alerts kept for inspection
    pub max_alert_history: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            min_samples: 5,
            degraded_error_rate: 0.2,
            unhealthy_error_rate: 0.5,
            degraded_latency_ms: 5_000,
            unhealthy_consecutive_failures: 3,
            max_alert_history: 256,
        }
    }
}

// ============================================================================
// Provider Health
// ============================================================================

#[derive(Clone, Copy, Debug)]
struct Sample {
    latency_ms: u64,
    success: bool,
}

#[derive(Debug, Default)]
struct HealthWindow {
    samples: VecDeque<Sample>,
    request_count: u64,
    success_count: u64,
    failure_count: u64,
    consecutive_failures: u32,
    last_success: Option<Instant>,
    last_failure: Option<Instant>,
}

impl HealthWindow {
    fn push(&mut self, sample: Sample, capacity: usize) {
        if self.samples.len() >= capacity.max(1) {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn error_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let failures = self.samples.iter().filter(|s| !s.success).count();
        failures as f64 / self.samples.len() as f64
    }

    /// Mean latency of successful samples
    fn average_latency_ms(&self) -> Option<f64> {
        let (sum, count) = self
            .samples
            .iter()
            .filter(|s| s.success)
            .fold((0u64, 0u64), |(sum, count), s| (sum + s.latency_ms, count + 1));
        (count > 0).then(|| sum as f64 / count as f64)
    }
}

/// Rolling health state of one provider
pub struct ProviderHealth {
    name: String,
    default_latency_ms: u64,
    window: Mutex<HealthWindow>,
}

impl ProviderHealth {
    /// Create empty health state
    pub fn new(name: impl Into<String>, default_latency_ms: u64) -> Self {
        Self {
            name: name.into(),
            default_latency_ms,
            window: Mutex::new(HealthWindow::default()),
        }
    }

    /// Provider name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn record(&self, latency_ms: u64, success: bool, capacity: usize) {
        let mut window = self.window.lock();
        window.push(Sample { latency_ms, success }, capacity);
        window.request_count += 1;
        if success {
            window.success_count += 1;
            window.consecutive_failures = 0;
            window.last_success = Some(Instant::now());
        } else {
            window.failure_count += 1;
            window.consecutive_failures += 1;
            window.last_failure = Some(Instant::now());
        }
    }

    fn reset(&self) {
        *self.window.lock() = HealthWindow::default();
    }

    /// Observed average latency, or the configured default without samples
    pub fn latency_estimate_ms(&self) -> f64 {
        self.window
            .lock()
            .average_latency_ms()
            .unwrap_or(self.default_latency_ms as f64)
    }

    /// Point-in-time view of this provider's health
    pub fn snapshot(&self, config: &HealthConfig) -> HealthSnapshot {
        let window = self.window.lock();
        let error_rate = window.error_rate();
        let average_latency_ms = window.average_latency_ms();

        let status = if window.samples.is_empty() {
            HealthStatus::Unknown
        } else if window.consecutive_failures >= config.unhealthy_consecutive_failures
            || (window.samples.len() >= config.min_samples
                && error_rate >= config.unhealthy_error_rate)
        {
            HealthStatus::Unhealthy
        } else if error_rate >= config.degraded_error_rate
            || average_latency_ms.is_some_and(|l| l >= config.degraded_latency_ms as f64)
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthSnapshot {
            provider: self.name.clone(),
            status,
            error_rate,
            average_latency_ms,
            sample_count: window.samples.len(),
            request_count: window.request_count,
            success_count: window.success_count,
            failure_count: window.failure_count,
            consecutive_failures: window.consecutive_failures,
            time_since_last_success: window.last_success.map(|t| t.elapsed()),
            time_since_last_failure: window.last_failure.map(|t| t.elapsed()),
        }
    }
}

impl fmt::Debug for ProviderHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHealth")
            .field("name", &self.name)
            .field("default_latency_ms", &self.default_latency_ms)
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of a provider's health
#[derive(Clone, Debug, PartialEq)]
pub struct HealthSnapshot {
    /// Provider name
    pub provider: String,
    /// Derived tier
    pub status: HealthStatus,
    /// Failure share of the window (0.0 - 1.0)
    pub error_rate: f64,
    /// Mean latency of successful samples in the window
    pub average_latency_ms: Option<f64>,
    /// Samples currently in the window
    pub sample_count: usize,
    /// Lifetime invocations
    pub request_count: u64,
    /// Lifetime successes
    pub success_count: u64,
    /// Lifetime failures
    pub failure_count: u64,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Time since the last success
    pub time_since_last_success: Option<Duration>,
    /// Time since the last failure
    pub time_since_last_failure: Option<Duration>,
}

// ============================================================================
// Alerts
// ============================================================================

/// What an alert is about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    /// Error rate over threshold
    ErrorRate,
    /// Average latency over threshold
    Latency,
    /// Run of consecutive failures
    Availability,
}

/// How bad it is
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Worth watching
    Warning,
    /// Needs attention
    Critical,
}

/// A health alert
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert ID
    pub id: String,
    /// Provider concerned
    pub provider: String,
    /// Category
    pub category: AlertCategory,
    /// Severity
    pub severity: AlertSeverity,
    /// Human-readable description
    pub message: String,
    /// When the alert was raised
    pub raised_at: DateTime<Utc>,
    /// When the alert was resolved
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct AlertBook {
    active: Vec<Alert>,
    history: VecDeque<Alert>,
}

impl AlertBook {
    fn resolve_at(&mut self, index: usize, max_history: usize) -> Alert {
        let mut alert = self.active.remove(index);
        alert.resolved_at = Some(Utc::now());
        if self.history.len() >= max_history.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(alert.clone());
        alert
    }
}

// ============================================================================
// Health Monitor
// ============================================================================

/// Health state for all configured providers
pub struct HealthMonitor {
    config: HealthConfig,
    providers: DashMap<String, Arc<ProviderHealth>>,
    alerts: Mutex<AlertBook>,
}

impl HealthMonitor {
    /// Create a monitor tracking the given providers
    pub fn new(config: HealthConfig, profiles: &[ProviderProfile]) -> Self {
        let providers = DashMap::new();
        for profile in profiles {
            providers.insert(
                profile.name.clone(),
                Arc::new(ProviderHealth::new(&profile.name, profile.default_latency_ms)),
            );
        }
        Self {
            config,
            providers,
            alerts: Mutex::new(AlertBook::default()),
        }
    }

    /// Thresholds in use
    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Health state of a provider
    pub fn get(&self, provider: &str) -> Option<Arc<ProviderHealth>> {
        self.providers.get(provider).map(|h| Arc::clone(h.value()))
    }

    /// Record a successful invocation
    pub fn record_success(&self, provider: &str, latency_ms: u64) {
        self.record(provider, latency_ms, true);
    }

    /// Record a failed invocation
    pub fn record_failure(&self, provider: &str, latency_ms: u64) {
        self.record(provider, latency_ms, false);
    }

    fn record(&self, provider: &str, latency_ms: u64, success: bool) {
        let Some(health) = self.get(provider) else {
            tracing::debug!(provider, "Ignoring sample for untracked provider");
            return;
        };
        health.record(latency_ms, success, self.config.window_size);
        let snapshot = health.snapshot(&self.config);
        self.evaluate_alerts(&snapshot);
    }

    /// Health tier of a provider (`Unknown` for untracked providers)
    pub fn status(&self, provider: &str) -> HealthStatus {
        self.get(provider)
            .map_or(HealthStatus::Unknown, |h| h.snapshot(&self.config).status)
    }

    /// Observed average latency, or the configured default without samples
    pub fn latency_estimate_ms(&self, provider: &str) -> Option<f64> {
        self.get(provider).map(|h| h.latency_estimate_ms())
    }

    /// Snapshot of one provider
    pub fn snapshot(&self, provider: &str) -> Option<HealthSnapshot> {
        self.get(provider).map(|h| h.snapshot(&self.config))
    }

    /// Snapshots of all providers, sorted by name
    pub fn all_snapshots(&self) -> Vec<HealthSnapshot> {
        let mut snapshots: Vec<_> = self
            .providers
            .iter()
            .map(|e| e.value().snapshot(&self.config))
            .collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }

    /// Clear a provider's samples and resolve its alerts
    pub fn reset(&self, provider: &str) {
        if let Some(health) = self.get(provider) {
            health.reset();
        }
        let mut book = self.alerts.lock();
        while let Some(index) = book.active.iter().position(|a| a.provider == provider) {
            book.resolve_at(index, self.config.max_alert_history);
        }
    }

    /// Alerts currently raised
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.lock().active.clone()
    }

    /// Recently resolved alerts, oldest first
    pub fn alert_history(&self) -> Vec<Alert> {
        self.alerts.lock().history.iter().cloned().collect()
    }

    /// Resolve an alert by ID
    ///
    /// Returns false when no active alert has that ID. An alert whose
    /// condition still holds is raised again on the next sample.
    pub fn resolve_alert(&self, id: &str) -> bool {
        let mut book = self.alerts.lock();
        let Some(index) = book.active.iter().position(|a| a.id == id) else {
            return false;
        };
        let alert = book.resolve_at(index, self.config.max_alert_history);
        tracing::info!(provider = %alert.provider, alert_id = %alert.id, "Alert resolved manually");
        true
    }

    fn evaluate_alerts(&self, snapshot: &HealthSnapshot) {
        let config = &self.config;

        let error_rate = if snapshot.sample_count < config.min_samples {
            None
        } else if snapshot.error_rate >= config.unhealthy_error_rate {
            Some(AlertSeverity::Critical)
        } else if snapshot.error_rate >= config.degraded_error_rate {
            Some(AlertSeverity::Warning)
        } else {
            None
        };

        let latency = snapshot.average_latency_ms.and_then(|avg| {
            let threshold = config.degraded_latency_ms as f64;
            if avg >= threshold * 2.0 {
                Some(AlertSeverity::Critical)
            } else if avg >= threshold {
                Some(AlertSeverity::Warning)
            } else {
                None
            }
        });

        let availability = (snapshot.consecutive_failures >= config.unhealthy_consecutive_failures)
            .then_some(AlertSeverity::Critical);

        let mut book = self.alerts.lock();
        self.apply_condition(
            &mut book,
            snapshot,
            AlertCategory::ErrorRate,
            error_rate,
            format!("error rate {:.0}%", snapshot.error_rate * 100.0),
        );
        self.apply_condition(
            &mut book,
            snapshot,
            AlertCategory::Latency,
            latency,
            format!(
                "average latency {:.0}ms",
                snapshot.average_latency_ms.unwrap_or_default()
            ),
        );
        self.apply_condition(
            &mut book,
            snapshot,
            AlertCategory::Availability,
            availability,
            format!("{} consecutive failures", snapshot.consecutive_failures),
        );
    }

    fn apply_condition(
        &self,
        book: &mut AlertBook,
        snapshot: &HealthSnapshot,
        category: AlertCategory,
        severity: Option<AlertSeverity>,
        message: String,
    ) {
        let existing = book
            .active
            .iter()
            .position(|a| a.provider == snapshot.provider && a.category == category);

        match (existing, severity) {
            (Some(index), None) => {
                let alert = book.resolve_at(index, self.config.max_alert_history);
                tracing::info!(
                    provider = %alert.provider,
                    category = ?alert.category,
                    "Alert auto-resolved"
                );
            }
            (Some(index), Some(severity)) => {
                let alert = &mut book.active[index];
                if alert.severity != severity {
                    alert.severity = severity;
                    alert.message.clone_from(&message);
                }
            }
            (None, Some(severity)) => {
                let alert = Alert {
                    id: uuid::Uuid::new_v4().to_string(),
                    provider: snapshot.provider.clone(),
                    category,
                    severity,
                    message,
                    raised_at: Utc::now(),
                    resolved_at: None,
                };
                tracing::warn!(
                    provider = %alert.provider,
                    category = ?alert.category,
                    severity = ?alert.severity,
                    message = %alert.message,
                    "Health alert raised"
                );
                book.active.push(alert);
            }
            (None, None) => {}
        }
    }
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("providers", &self.providers.len())
            .field("active_alerts", &self.alerts.lock().active.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(config: HealthConfig) -> HealthMonitor {
        HealthMonitor::new(
            config,
            &[
                ProviderProfile::new("alpha", 1.0, 800),
                ProviderProfile::new("beta", 2.0, 300),
            ],
        )
    }

    #[test]
    fn test_unknown_without_samples() {
        let monitor = monitor(HealthConfig::default());
        assert_eq!(monitor.status("alpha"), HealthStatus::Unknown);
        assert_eq!(monitor.status("missing"), HealthStatus::Unknown);
        assert_eq!(monitor.latency_estimate_ms("alpha"), Some(800.0));
        assert_eq!(monitor.latency_estimate_ms("missing"), None);
    }

    #[test]
    fn test_healthy_after_successes() {
        let monitor = monitor(HealthConfig::default());
        monitor.record_success("alpha", 100);
        monitor.record_success("alpha", 300);

        let snapshot = monitor.snapshot("alpha").unwrap();
        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert_eq!(snapshot.average_latency_ms, Some(200.0));
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(monitor.latency_estimate_ms("alpha"), Some(200.0));
    }

    #[test]
    fn test_degraded_on_error_rate() {
        let monitor = monitor(HealthConfig::default());
        for _ in 0..3 {
            monitor.record_success("alpha", 100);
        }
        monitor.record_failure("alpha", 100);

        // 1 of 4 failed = 25%
        assert_eq!(monitor.status("alpha"), HealthStatus::Degraded);
    }

    #[test]
    fn test_degraded_on_latency() {
        let monitor = monitor(HealthConfig {
            degraded_latency_ms: 1_000,
            ..Default::default()
        });
        monitor.record_success("alpha", 1_500);
        assert_eq!(monitor.status("alpha"), HealthStatus::Degraded);
    }

    #[test]
    fn test_unhealthy_on_consecutive_failures() {
        let monitor = monitor(HealthConfig::default());
        monitor.record_failure("beta", 10);
        monitor.record_failure("beta", 10);
        assert_ne!(monitor.status("beta"), HealthStatus::Unhealthy);

        monitor.record_failure("beta", 10);
        assert_eq!(monitor.status("beta"), HealthStatus::Unhealthy);

        monitor.record_success("beta", 10);
        assert_ne!(monitor.status("beta"), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_unhealthy_error_rate_needs_min_samples() {
        let monitor = monitor(HealthConfig {
            min_samples: 4,
            unhealthy_consecutive_failures: 100,
            ..Default::default()
        });

        monitor.record_failure("alpha", 10);
        monitor.record_success("alpha", 10);
        monitor.record_failure("alpha", 10);
        assert_eq!(monitor.status("alpha"), HealthStatus::Degraded);

        monitor.record_success("alpha", 10);
        monitor.record_failure("alpha", 10);
        assert_eq!(monitor.status("alpha"), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_window_is_bounded() {
        let monitor = monitor(HealthConfig {
            window_size: 3,
            ..Default::default()
        });

        monitor.record_failure("alpha", 10);
        monitor.record_failure("alpha", 10);
        for _ in 0..3 {
            monitor.record_success("alpha", 10);
        }

        let snapshot = monitor.snapshot("alpha").unwrap();
        assert_eq!(snapshot.sample_count, 3);
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.request_count, 5);
        assert_eq!(snapshot.failure_count, 2);
    }

    #[test]
    fn test_availability_alert_raised_and_auto_resolved() {
        let monitor = monitor(HealthConfig::default());
        for _ in 0..3 {
            monitor.record_failure("alpha", 10);
        }

        let alerts = monitor.active_alerts();
        let availability: Vec<_> = alerts
            .iter()
            .filter(|a| a.category == AlertCategory::Availability)
            .collect();
        assert_eq!(availability.len(), 1);
        assert_eq!(availability[0].severity, AlertSeverity::Critical);
        assert_eq!(availability[0].provider, "alpha");

        // Still failing: no duplicate alert
        monitor.record_failure("alpha", 10);
        assert_eq!(
            monitor
                .active_alerts()
                .iter()
                .filter(|a| a.category == AlertCategory::Availability)
                .count(),
            1
        );

        monitor.record_success("alpha", 10);
        assert!(monitor
            .active_alerts()
            .iter()
            .all(|a| a.category != AlertCategory::Availability));
        assert!(monitor
            .alert_history()
            .iter()
            .any(|a| a.category == AlertCategory::Availability && a.resolved_at.is_some()));
    }

    #[test]
    fn test_manual_resolve() {
        let monitor = monitor(HealthConfig {
            degraded_latency_ms: 100,
            ..Default::default()
        });
        monitor.record_success("beta", 150);

        let alerts = monitor.active_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::Latency);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);

        assert!(monitor.resolve_alert(&alerts[0].id));
        assert!(monitor.active_alerts().is_empty());
        assert!(!monitor.resolve_alert(&alerts[0].id));
        assert_eq!(monitor.alert_history().len(), 1);
    }

    #[test]
    fn test_alert_history_bounded() {
        let monitor = monitor(HealthConfig {
            degraded_latency_ms: 100,
            max_alert_history: 2,
            ..Default::default()
        });

        for _ in 0..5 {
            monitor.record_success("alpha", 150);
            let id = monitor.active_alerts()[0].id.clone();
            monitor.resolve_alert(&id);
        }

        assert_eq!(monitor.alert_history().len(), 2);
    }

    #[test]
    fn test_reset_clears_samples_and_alerts() {
        let monitor = monitor(HealthConfig::default());
        for _ in 0..3 {
            monitor.record_failure("alpha", 10);
        }
        assert!(!monitor.active_alerts().is_empty());

        monitor.reset("alpha");
        assert_eq!(monitor.status("alpha"), HealthStatus::Unknown);
        assert!(monitor.active_alerts().is_empty());
    }
}
