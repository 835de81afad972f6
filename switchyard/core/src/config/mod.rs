//! TOML Configuration File Support
//!
//! Loads dispatcher and hybrid router settings from
//! `$XDG_CONFIG_HOME/switchyard/switchyard.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`SWITCHYARD_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [dispatch]
//! strategy = "latency-optimized"
//! max_retries = 2
//! timeout_ms = 30000
//!
//! [retry]
//! base_backoff_ms = 100
//! max_backoff_ms = 5000
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! cooldown_ms = 60000
//!
//! [cache]
//! enabled = true
//! max_entries = 1000
//! ttl_secs = 300
//!
//! [[providers]]
//! name = "primary"
//! cost_per_unit = 0.002
//! default_latency_ms = 800
//!
//! [[routing_rules]]
//! operation_type = "emergency"
//! route = "direct"
//! priority = 100
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::config::{
    DispatcherConfig, HybridConfig, ProviderProfile, RoutingRule, Strategy, TaskClassRule,
};

const DEFAULT_COST_PER_UNIT: f64 = 1.0;
const DEFAULT_LATENCY_MS: u64 = 1_000;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where configuration values came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line argument
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Built-in default
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[dispatch]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchToml {
    /// Ordering strategy name
    pub strategy: Option<String>,

    /// Extra attempt rounds after the first
    pub max_retries: Option<u32>,

    /// Per-invocation timeout in milliseconds
    pub timeout_ms: Option<u64>,

    /// Force domain-specific ordering
    pub smart_routing: Option<bool>,
}

/// `[retry]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryToml {
    /// Backoff before the second round
    pub base_backoff_ms: Option<u64>,

    /// Backoff cap
    pub max_backoff_ms: Option<u64>,

    /// Growth factor per round
    pub backoff_multiplier: Option<f32>,

    /// Add up to 25% random jitter
    pub jitter: Option<bool>,
}

/// `[circuit_breaker]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerToml {
    /// Consecutive failures that open a circuit
    pub failure_threshold: Option<u32>,

    /// Open duration before a trial, in milliseconds
    pub cooldown_ms: Option<u64>,
}

/// `[health]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthToml {
    /// Samples kept per provider
    pub window_size: Option<usize>,

    /// Samples required before error rate counts
    pub min_samples: Option<usize>,

    /// Error rate for the degraded tier
    pub degraded_error_rate: Option<f64>,

    /// Error rate for the unhealthy tier
    pub unhealthy_error_rate: Option<f64>,

    /// Average latency for the degraded tier
    pub degraded_latency_ms: Option<u64>,

    /// Consecutive failures for the unhealthy tier
    pub unhealthy_consecutive_failures: Option<u32>,

    /// Resolved alerts kept
    pub max_alert_history: Option<usize>,
}

/// `[cache]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Whether responses are cached
    pub enabled: Option<bool>,

    /// Entry limit
    pub max_entries: Option<usize>,

    /// Entry lifetime in seconds
    pub ttl_secs: Option<u64>,
}

/// `[hybrid]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridToml {
    /// Timeout for one route attempt in milliseconds
    pub route_timeout_ms: Option<u64>,

    /// Consecutive failures that open a route's circuit
    pub failure_threshold: Option<u32>,

    /// Route circuit cooldown in milliseconds
    pub cooldown_ms: Option<u64>,
}

/// One `[[providers]]` entry
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToml {
    /// Provider name
    pub name: String,

    /// Static cost per unit
    pub cost_per_unit: Option<f64>,

    /// Latency assumed before any samples exist
    pub default_latency_ms: Option<u64>,

    /// Whether the provider may be used
    pub enabled: Option<bool>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchyardToml {
    /// Dispatch section
    pub dispatch: DispatchToml,

    /// Retry section
    pub retry: RetryToml,

    /// Circuit breaker section
    pub circuit_breaker: CircuitBreakerToml,

    /// Health section
    pub health: HealthToml,

    /// Cache section
    pub cache: CacheToml,

    /// Hybrid router section
    pub hybrid: HybridToml,

    /// Provider profiles
    pub providers: Vec<ProviderToml>,

    /// Hybrid routing rules (replace the built-in table when present)
    pub routing_rules: Vec<RoutingRule>,

    /// Task classes (replace the built-in table when present)
    pub task_classes: Vec<TaskClassRule>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Fully resolved configuration
///
/// Use [`load_config`] to load with proper priority handling.
#[derive(Clone, Debug, Default)]
pub struct SwitchyardConfig {
    /// Dispatcher settings
    pub dispatch: DispatcherConfig,

    /// Hybrid router settings
    pub hybrid: HybridConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: Option<ConfigSource>,
}

impl SwitchyardConfig {
    /// Configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source.unwrap_or(ConfigSource::Default)
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = Some(source);
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dispatch = &self.dispatch;

        if dispatch.timeout.is_zero() {
            return Err(invalid("dispatch.timeout_ms must be greater than 0"));
        }
        if dispatch.breaker.failure_threshold == 0 {
            return Err(invalid(
                "circuit_breaker.failure_threshold must be greater than 0",
            ));
        }
        if dispatch.retry.backoff_multiplier < 1.0 {
            return Err(invalid("retry.backoff_multiplier must be at least 1.0"));
        }
        if dispatch.health.unhealthy_error_rate < dispatch.health.degraded_error_rate {
            return Err(invalid(
                "health.unhealthy_error_rate must not be below health.degraded_error_rate",
            ));
        }

        let mut names = HashSet::new();
        for provider in &dispatch.providers {
            if provider.name.trim().is_empty() {
                return Err(invalid("provider name must not be empty"));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(invalid(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
            if !provider.cost_per_unit.is_finite() || provider.cost_per_unit < 0.0 {
                return Err(invalid(format!(
                    "provider '{}' has an invalid cost_per_unit",
                    provider.name
                )));
            }
        }

        if self.hybrid.route_timeout.is_zero() {
            return Err(invalid("hybrid.route_timeout_ms must be greater than 0"));
        }
        if self.hybrid.breaker.failure_threshold == 0 {
            return Err(invalid("hybrid.failure_threshold must be greater than 0"));
        }
        validate_routing_rules(&self.hybrid.rules)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Check a routing rule table
///
/// # Errors
///
/// Returns `ValidationError` for an empty or duplicated operation type.
pub fn validate_routing_rules(rules: &[RoutingRule]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if rule.operation_type.trim().is_empty() {
            return Err(invalid("routing rule operation_type must not be empty"));
        }
        if !seen.insert(rule.operation_type.as_str()) {
            return Err(invalid(format!(
                "duplicate routing rule for operation type '{}'",
                rule.operation_type
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/switchyard/switchyard.toml` or
/// `~/.config/switchyard/switchyard.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("switchyard").join("switchyard.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI overrides are not handled here; apply [`ConfigOverrides`] afterwards.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the merged configuration is invalid. A missing file is not an error.
pub fn load_config() -> Result<SwitchyardConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// With `None`, only defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the merged
/// configuration is invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<SwitchyardConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration reading environment values through `env`
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<SwitchyardConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = SwitchyardConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_config = read_toml(config_path)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = Some(ConfigSource::File);

            tracing::info!(
                path = %config_path.display(),
                providers = config.dispatch.providers.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env)?;
    config.validate()?;

    Ok(config)
}

fn read_toml(path: &Path) -> Result<SwitchyardToml, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(toml::from_str(&content)?)
}

fn parse_strategy(value: &str, origin: &str) -> Result<Strategy, ConfigError> {
    value
        .parse::<Strategy>()
        .map_err(|e| invalid(format!("{origin}: {e}")))
}

/// Apply TOML values to the config struct
fn apply_toml_config(
    config: &mut SwitchyardConfig,
    toml: &SwitchyardToml,
) -> Result<(), ConfigError> {
    let dispatch = &mut config.dispatch;

    // Dispatch settings
    if let Some(ref strategy) = toml.dispatch.strategy {
        dispatch.strategy = parse_strategy(strategy, "dispatch.strategy")?;
    }
    if let Some(retries) = toml.dispatch.max_retries {
        dispatch.retry.max_retries = retries;
    }
    if let Some(ms) = toml.dispatch.timeout_ms {
        dispatch.timeout = Duration::from_millis(ms);
    }
    if let Some(smart) = toml.dispatch.smart_routing {
        dispatch.smart_routing = smart;
    }

    // Retry settings
    if let Some(ms) = toml.retry.base_backoff_ms {
        dispatch.retry.base_backoff_ms = ms;
    }
    if let Some(ms) = toml.retry.max_backoff_ms {
        dispatch.retry.max_backoff_ms = ms;
    }
    if let Some(multiplier) = toml.retry.backoff_multiplier {
        dispatch.retry.backoff_multiplier = multiplier;
    }
    if let Some(jitter) = toml.retry.jitter {
        dispatch.retry.use_jitter = jitter;
    }

    // Circuit breaker settings
    if let Some(threshold) = toml.circuit_breaker.failure_threshold {
        dispatch.breaker.failure_threshold = threshold;
    }
    if let Some(ms) = toml.circuit_breaker.cooldown_ms {
        dispatch.breaker.cooldown = Duration::from_millis(ms);
    }

    // Health settings
    let health = &mut dispatch.health;
    if let Some(size) = toml.health.window_size {
        health.window_size = size;
    }
    if let Some(n) = toml.health.min_samples {
        health.min_samples = n;
    }
    if let Some(rate) = toml.health.degraded_error_rate {
        health.degraded_error_rate = rate;
    }
    if let Some(rate) = toml.health.unhealthy_error_rate {
        health.unhealthy_error_rate = rate;
    }
    if let Some(ms) = toml.health.degraded_latency_ms {
        health.degraded_latency_ms = ms;
    }
    if let Some(n) = toml.health.unhealthy_consecutive_failures {
        health.unhealthy_consecutive_failures = n;
    }
    if let Some(n) = toml.health.max_alert_history {
        health.max_alert_history = n;
    }

    // Cache settings
    if let Some(enabled) = toml.cache.enabled {
        dispatch.cache.enabled = enabled;
    }
    if let Some(n) = toml.cache.max_entries {
        dispatch.cache.max_entries = n;
    }
    if let Some(secs) = toml.cache.ttl_secs {
        dispatch.cache.ttl = Duration::from_secs(secs);
    }

    // Providers and task classes
    if !toml.providers.is_empty() {
        dispatch.providers = toml
            .providers
            .iter()
            .map(|p| ProviderProfile {
                name: p.name.clone(),
                cost_per_unit: p.cost_per_unit.unwrap_or(DEFAULT_COST_PER_UNIT),
                default_latency_ms: p.default_latency_ms.unwrap_or(DEFAULT_LATENCY_MS),
                enabled: p.enabled.unwrap_or(true),
            })
            .collect();
    }
    if !toml.task_classes.is_empty() {
        dispatch.task_classes.clone_from(&toml.task_classes);
    }

    // Hybrid router settings
    if let Some(ms) = toml.hybrid.route_timeout_ms {
        config.hybrid.route_timeout = Duration::from_millis(ms);
    }
    if let Some(threshold) = toml.hybrid.failure_threshold {
        config.hybrid.breaker.failure_threshold = threshold;
    }
    if let Some(ms) = toml.hybrid.cooldown_ms {
        config.hybrid.breaker.cooldown = Duration::from_millis(ms);
    }
    if !toml.routing_rules.is_empty() {
        config.hybrid.rules.clone_from(&toml.routing_rules);
    }

    Ok(())
}

fn parse_bool(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Apply environment variable overrides
///
/// Unparseable numbers are ignored with a warning; an unknown strategy is
/// an error.
fn apply_env_config<F>(config: &mut SwitchyardConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut from_env = false;

    if let Some(strategy) = env("SWITCHYARD_STRATEGY") {
        config.dispatch.strategy = parse_strategy(&strategy, "SWITCHYARD_STRATEGY")?;
        from_env = true;
    }
    if let Some(retries) = env("SWITCHYARD_MAX_RETRIES") {
        match retries.parse::<u32>() {
            Ok(n) => {
                config.dispatch.retry.max_retries = n;
                from_env = true;
            }
            Err(_) => tracing::warn!(value = %retries, "Ignoring invalid SWITCHYARD_MAX_RETRIES"),
        }
    }
    if let Some(timeout) = env("SWITCHYARD_TIMEOUT_MS") {
        match timeout.parse::<u64>() {
            Ok(ms) => {
                config.dispatch.timeout = Duration::from_millis(ms);
                from_env = true;
            }
            Err(_) => tracing::warn!(value = %timeout, "Ignoring invalid SWITCHYARD_TIMEOUT_MS"),
        }
    }
    if let Some(enabled) = env("SWITCHYARD_CACHE_ENABLED") {
        config.dispatch.cache.enabled = parse_bool(&enabled);
        from_env = true;
    }
    if let Some(smart) = env("SWITCHYARD_SMART_ROUTING") {
        config.dispatch.smart_routing = parse_bool(&smart);
        from_env = true;
    }

    if from_env {
        config.source = Some(ConfigSource::Env);
    }
    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Strategy override
    pub strategy: Option<Strategy>,

    /// Max retries override
    pub max_retries: Option<u32>,

    /// Timeout override (milliseconds)
    pub timeout_ms: Option<u64>,

    /// Cache enabled override
    pub cache_enabled: Option<bool>,

    /// Smart routing override
    pub smart_routing: Option<bool>,
}

impl ConfigOverrides {
    /// Empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set strategy override
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Set max retries override
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set timeout override
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Set cache enabled override
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    /// Set smart routing override
    #[must_use]
    pub fn with_smart_routing(mut self, enabled: bool) -> Self {
        self.smart_routing = Some(enabled);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategy.is_none()
            && self.max_retries.is_none()
            && self.timeout_ms.is_none()
            && self.cache_enabled.is_none()
            && self.smart_routing.is_none()
    }

    /// Apply overrides and re-validate
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if an override produces an invalid config.
    pub fn apply(&self, config: &mut SwitchyardConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        config.source = Some(ConfigSource::Cli);

        if let Some(strategy) = self.strategy {
            config.dispatch.strategy = strategy;
        }
        if let Some(retries) = self.max_retries {
            config.dispatch.retry.max_retries = retries;
        }
        if let Some(ms) = self.timeout_ms {
            config.dispatch.timeout = Duration::from_millis(ms);
        }
        if let Some(enabled) = self.cache_enabled {
            config.dispatch.cache.enabled = enabled;
        }
        if let Some(smart) = self.smart_routing {
            config.dispatch.smart_routing = smart;
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::config::Route;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Defaults
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = SwitchyardConfig::default();

        assert_eq!(config.dispatch.strategy, Strategy::CostOptimized);
        assert_eq!(config.dispatch.retry.max_retries, 2);
        assert_eq!(config.dispatch.timeout, Duration::from_secs(30));
        assert!(config.dispatch.cache.enabled);
        assert_eq!(config.dispatch.cache.max_entries, 1000);
        assert_eq!(config.hybrid.rules.len(), 4);
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("switchyard/switchyard.toml"));
        }
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config =
            load_config_with_env(Some(PathBuf::from("/nonexistent/switchyard.toml")), no_env)
                .unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    // =========================================================================
    // TOML Parsing
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = write_config(
            r#"
[dispatch]
strategy = "round-robin"
max_retries = 4
timeout_ms = 2500
smart_routing = true

[retry]
base_backoff_ms = 50
jitter = true

[circuit_breaker]
failure_threshold = 3
cooldown_ms = 1500

[health]
window_size = 20

[cache]
enabled = false
ttl_secs = 10

[hybrid]
route_timeout_ms = 750

[[providers]]
name = "alpha"
cost_per_unit = 0.5
default_latency_ms = 200

[[providers]]
name = "beta"
enabled = false

[[routing_rules]]
operation_type = "urgent"
route = "direct"
priority = 90
reason = "page someone"

[[task_classes]]
name = "billing"
keywords = ["invoice"]
preferred_providers = ["beta"]
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        let dispatch = &config.dispatch;

        assert_eq!(dispatch.strategy, Strategy::RoundRobin);
        assert_eq!(dispatch.retry.max_retries, 4);
        assert_eq!(dispatch.timeout, Duration::from_millis(2500));
        assert!(dispatch.smart_routing);
        assert_eq!(dispatch.retry.base_backoff_ms, 50);
        assert!(dispatch.retry.use_jitter);
        assert_eq!(dispatch.breaker.failure_threshold, 3);
        assert_eq!(dispatch.breaker.cooldown, Duration::from_millis(1500));
        assert_eq!(dispatch.health.window_size, 20);
        assert!(!dispatch.cache.enabled);
        assert_eq!(dispatch.cache.ttl, Duration::from_secs(10));
        assert_eq!(config.hybrid.route_timeout, Duration::from_millis(750));

        assert_eq!(
            dispatch.providers,
            vec![
                ProviderProfile::new("alpha", 0.5, 200),
                ProviderProfile::new("beta", DEFAULT_COST_PER_UNIT, DEFAULT_LATENCY_MS).disabled(),
            ]
        );
        assert_eq!(
            config.hybrid.rules,
            vec![RoutingRule::new("urgent", Route::Direct, 90, "page someone")]
        );
        assert_eq!(dispatch.task_classes.len(), 1);
        assert_eq!(dispatch.task_classes[0].preferred_providers, vec!["beta"]);

        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let file = write_config("[dispatch]\nmax_retries = 0\n");
        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.dispatch.retry.max_retries, 0);
        assert_eq!(config.dispatch.timeout, Duration::from_secs(30));
        assert_eq!(config.hybrid.rules.len(), 4);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let file = write_config("[dispatch\nstrategy = ");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let file = write_config("[dispatch]\nstrategy = \"fastest\"\n");
        let err = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("fastest"));
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn test_zero_timeout_rejected() {
        let file = write_config("[dispatch]\ntimeout_ms = 0\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_zero_failure_threshold_rejected() {
        let file = write_config("[circuit_breaker]\nfailure_threshold = 0\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let file = write_config("[[providers]]\nname = \"a\"\n\n[[providers]]\nname = \"a\"\n");
        let err = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap_err();
        assert!(err.to_string().contains("duplicate provider name 'a'"));
    }

    #[test]
    fn test_routing_rule_validation() {
        let empty = vec![RoutingRule::new(" ", Route::Direct, 1, "")];
        assert!(validate_routing_rules(&empty).is_err());

        let duplicate = vec![
            RoutingRule::new("batch", Route::Direct, 1, ""),
            RoutingRule::new("batch", Route::Mediated, 2, ""),
        ];
        assert!(validate_routing_rules(&duplicate).is_err());
    }

    // =========================================================================
    // Environment Overrides
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        let file = write_config("[dispatch]\nstrategy = \"round-robin\"\nmax_retries = 4\n");
        let env: HashMap<&str, &str> = [
            ("SWITCHYARD_STRATEGY", "latency"),
            ("SWITCHYARD_TIMEOUT_MS", "1200"),
            ("SWITCHYARD_CACHE_ENABLED", "false"),
            ("SWITCHYARD_SMART_ROUTING", "1"),
        ]
        .into_iter()
        .collect();

        let config = load_config_with_env(Some(file.path().to_path_buf()), |k| {
            env.get(k).map(|v| (*v).to_string())
        })
        .unwrap();

        assert_eq!(config.dispatch.strategy, Strategy::LatencyOptimized);
        assert_eq!(config.dispatch.retry.max_retries, 4);
        assert_eq!(config.dispatch.timeout, Duration::from_millis(1200));
        assert!(!config.dispatch.cache.enabled);
        assert!(config.dispatch.smart_routing);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_env_invalid_number_ignored() {
        let config = load_config_with_env(None, |k| {
            (k == "SWITCHYARD_MAX_RETRIES").then(|| "many".to_string())
        })
        .unwrap();
        assert_eq!(config.dispatch.retry.max_retries, 2);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_env_invalid_strategy_rejected() {
        let result = load_config_with_env(None, |k| {
            (k == "SWITCHYARD_STRATEGY").then(|| "cheapest-ish".to_string())
        });
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    // =========================================================================
    // CLI Overrides
    // =========================================================================

    #[test]
    fn test_cli_overrides() {
        let mut config = SwitchyardConfig::default();
        let overrides = ConfigOverrides::new()
            .with_strategy(Strategy::DomainSpecific)
            .with_max_retries(0)
            .with_cache_enabled(false);

        overrides.apply(&mut config).unwrap();

        assert_eq!(config.dispatch.strategy, Strategy::DomainSpecific);
        assert_eq!(config.dispatch.retry.max_retries, 0);
        assert!(!config.dispatch.cache.enabled);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_empty_overrides_keep_source() {
        let mut config = SwitchyardConfig::default();
        ConfigOverrides::new().apply(&mut config).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_cli_zero_timeout_rejected() {
        let mut config = SwitchyardConfig::default();
        let result = ConfigOverrides::new().with_timeout_ms(0).apply(&mut config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}
