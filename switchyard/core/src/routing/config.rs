//! Routing Configuration
//!
//! Runtime configuration types for provider ordering, retries, task
//! classification and the hybrid route table. File and environment loading
//! lives in [`crate::config`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::breaker::BreakerConfig;
use super::cache::CacheConfig;
use super::health::HealthConfig;

// ============================================================================
// Ordering Strategy
// ============================================================================

/// Provider ordering strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Ascending static per-unit cost
    #[default]
    CostOptimized,

    /// Ascending observed average latency
    LatencyOptimized,

    /// Rotate the start index with each request
    RoundRobin,

    /// Preferred providers of the detected task class first
    ///
    /// Preferences come from the `[[task_classes]]` table. The built-in
    /// classes name no providers, so without that table this orders the
    /// same as [`Strategy::CostOptimized`].
    DomainSpecific,
}

impl Strategy {
    /// All strategies, in documentation order
    pub const ALL: [Strategy; 4] = [
        Self::CostOptimized,
        Self::LatencyOptimized,
        Self::RoundRobin,
        Self::DomainSpecific,
    ];

    /// Canonical name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CostOptimized => "cost-optimized",
            Self::LatencyOptimized => "latency-optimized",
            Self::RoundRobin => "round-robin",
            Self::DomainSpecific => "domain-specific",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy name that matches none of the known strategies
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown strategy '{0}' (expected cost-optimized, latency-optimized, round-robin or domain-specific)")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "cost-optimized" | "cost" => Ok(Self::CostOptimized),
            "latency-optimized" | "latency" => Ok(Self::LatencyOptimized),
            "round-robin" => Ok(Self::RoundRobin),
            "domain-specific" | "domain" | "smart" => Ok(Self::DomainSpecific),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

// ============================================================================
// Provider Profiles
// ============================================================================

/// Static facts about a configured provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Provider name
    pub name: String,

    /// Cost of one request, in arbitrary currency units
    pub cost_per_unit: f64,

    /// Latency assumed until samples are observed
    pub default_latency_ms: u64,

    /// Whether the provider is configured on
    pub enabled: bool,
}

impl ProviderProfile {
    /// Create an enabled profile
    pub fn new(name: impl Into<String>, cost_per_unit: f64, default_latency_ms: u64) -> Self {
        Self {
            name: name.into(),
            cost_per_unit,
            default_latency_ms,
            enabled: true,
        }
    }

    /// Mark the profile as disabled
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// ============================================================================
// Retry Configuration
// ============================================================================

/// Retry rounds and backoff between them
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra rounds after the first
    pub max_retries: u32,

    /// Backoff before the second round
    pub base_backoff_ms: u64,

    /// Backoff cap
    pub max_backoff_ms: u64,

    /// Growth factor per round
    pub backoff_multiplier: f32,

    /// Add up to 25% random jitter
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 100,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }
}

impl RetryConfig {
    /// Backoff after round `attempt` (0-indexed) has failed
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.base_backoff_ms as f64 * f64::from(self.backoff_multiplier).powi(exponent);
        let capped = base.min(self.max_backoff_ms as f64);

        let duration_ms = if self.use_jitter {
            let jitter = rand::random::<f64>() * 0.25;
            (capped * (1.0 + jitter)) as u64
        } else {
            capped as u64
        };

        Duration::from_millis(duration_ms)
    }

    /// Total number of rounds
    #[must_use]
    pub fn rounds(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

// ============================================================================
// Task Classification
// ============================================================================

/// One entry of the task classification table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskClassRule {
    /// Class name (e.g. "infrastructure")
    pub name: String,

    /// Whole words that select this class when found in the prompt
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Request domains that select this class
    #[serde(default)]
    pub domains: Vec<String>,

    /// Providers to try first, in order
    #[serde(default)]
    pub preferred_providers: Vec<String>,
}

impl TaskClassRule {
    /// Create a rule with no keywords, domains or preferences
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keywords: Vec::new(),
            domains: Vec::new(),
            preferred_providers: Vec::new(),
        }
    }

    /// Add keywords
    #[must_use]
    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords.extend(keywords.iter().map(|k| (*k).to_string()));
        self
    }

    /// Add domains
    #[must_use]
    pub fn with_domains(mut self, domains: &[&str]) -> Self {
        self.domains.extend(domains.iter().map(|d| (*d).to_string()));
        self
    }

    /// Set preferred providers
    #[must_use]
    pub fn with_preferred(mut self, providers: &[&str]) -> Self {
        self.preferred_providers = providers.iter().map(|p| (*p).to_string()).collect();
        self
    }
}

/// Built-in classification table
///
/// Preferred providers are left empty; deployments name their own providers
/// through `[[task_classes]]`.
#[must_use]
pub fn default_task_classes() -> Vec<TaskClassRule> {
    vec![
        TaskClassRule::new("infrastructure")
            .with_keywords(&[
                "deploy",
                "deployment",
                "kubernetes",
                "k8s",
                "server",
                "network",
                "outage",
                "latency",
                "database",
                "infrastructure",
                "cluster",
            ])
            .with_domains(&["infrastructure", "devops", "operations"]),
        TaskClassRule::new("analytics")
            .with_keywords(&[
                "analyze", "analyse", "analysis", "metrics", "report", "trend", "dashboard",
                "forecast", "statistics",
            ])
            .with_domains(&["analytics", "reporting", "finance"]),
        TaskClassRule::new("general"),
    ]
}

// ============================================================================
// Hybrid Routing Rules
// ============================================================================

/// One of the two hybrid transport paths
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Fast path straight to the transport
    Direct,
    /// Bridged path through an intermediary
    Mediated,
}

impl Route {
    /// The route that is not this one
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Direct => Self::Mediated,
            Self::Mediated => Self::Direct,
        }
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Mediated => "mediated",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an operation type to its preferred route
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Operation type this rule applies to
    pub operation_type: String,

    /// Preferred route
    pub route: Route,

    /// Higher means more important; used for listing order
    #[serde(default)]
    pub priority: u32,

    /// Why the operation uses this route
    #[serde(default)]
    pub reason: String,
}

impl RoutingRule {
    /// Create a rule
    pub fn new(
        operation_type: impl Into<String>,
        route: Route,
        priority: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            operation_type: operation_type.into(),
            route,
            priority,
            reason: reason.into(),
        }
    }
}

/// Built-in routing rules
#[must_use]
pub fn default_routing_rules() -> Vec<RoutingRule> {
    vec![
        RoutingRule::new("emergency", Route::Direct, 100, "lowest latency for emergencies"),
        RoutingRule::new("interactive", Route::Direct, 80, "user is waiting"),
        RoutingRule::new("batch", Route::Mediated, 40, "throughput over latency"),
        RoutingRule::new("background", Route::Mediated, 20, "no user waiting"),
    ]
}

// ============================================================================
// Component Configuration
// ============================================================================

/// Everything the dispatcher needs
#[derive(Clone, Debug, PartialEq)]
pub struct DispatcherConfig {
    /// Ordering strategy
    pub strategy: Strategy,

    /// Force domain-specific ordering regardless of `strategy`
    pub smart_routing: bool,

    /// Per-invocation timeout
    pub timeout: Duration,

    /// Retry rounds and backoff
    pub retry: RetryConfig,

    /// Per-provider circuit breaker settings
    pub breaker: BreakerConfig,

    /// Health tiers and alerting
    pub health: HealthConfig,

    /// Response cache
    pub cache: CacheConfig,

    /// Configured providers, in declaration order
    pub providers: Vec<ProviderProfile>,

    /// Task classification table
    pub task_classes: Vec<TaskClassRule>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            smart_routing: false,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            health: HealthConfig::default(),
            cache: CacheConfig::default(),
            providers: Vec::new(),
            task_classes: default_task_classes(),
        }
    }
}

impl DispatcherConfig {
    /// Profile for a provider
    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&ProviderProfile> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Everything the hybrid router needs
#[derive(Clone, Debug, PartialEq)]
pub struct HybridConfig {
    /// Timeout for one route attempt
    pub route_timeout: Duration,

    /// Per-route circuit breaker settings
    pub breaker: BreakerConfig,

    /// Routing rule table
    pub rules: Vec<RoutingRule>,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            route_timeout: Duration::from_secs(10),
            breaker: BreakerConfig::default(),
            rules: default_routing_rules(),
        }
    }
}
