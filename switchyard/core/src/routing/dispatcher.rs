//! Dispatcher
//!
//! Resilient entry point for inference requests.
//!
//! # Dispatch Flow
//!
//! ```text
//! 1. Cache lookup (a hit returns immediately, no provider contacted)
//! 2. Candidates = configured ∩ flag-enabled ∩ circuit not open
//! 3. Order candidates (strategy, health, pin)
//! 4. Attempt rounds: try each candidate in order under a timeout;
//!    first valid reply wins. After a failed round, back off, recompute
//!    candidates and try again, up to 1 + max_retries rounds.
//! 5. Record metrics, write the cache, emit an audit event
//! ```
//!
//! [`Dispatcher::generate_response`] never returns an error: upstream
//! failures become a `Response` with `success = false`.
//!
//! Dropping the future mid-flight (caller cancelled, an outer timeout such
//! as a hybrid route's) counts the interrupted invocation as a failed
//! attempt and the request as failed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::audit::{AuditSink, RoutingEvent, RoutingEventKind, TracingAuditSink};
use crate::error::DispatchError;
use crate::flags::{FlagSource, StaticFlags, FLAG_RESPONSE_CACHE, FLAG_SMART_ROUTING};
use crate::provider::{Provider, ValidReply};
use crate::request::{Request, Response};

use super::breaker::{BreakerPermit, CircuitBreaker, CircuitState};
use super::cache::{cache_key, CacheStats, ResponseCache};
use super::config::{DispatcherConfig, ProviderProfile, Strategy};
use super::health::{Alert, HealthMonitor, HealthStatus};
use super::hybrid::RouteTransport;
use super::metrics::{DispatchMetrics, MetricsSnapshot};
use super::policy::{apply_preferences, order_providers, OrderingContext, TaskClassifier};

const DEFAULT_COST_PER_UNIT: f64 = 1.0;
const DEFAULT_LATENCY_MS: u64 = 1_000;

// ============================================================================
// Operator Reports
// ============================================================================

/// Health of one provider as seen by operators
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ProviderHealthReport {
    /// Provider name
    pub provider: String,
    /// Health tier
    pub status: HealthStatus,
    /// Latency estimate (observed, or the configured default)
    pub latency_ms: f64,
    /// Failure share of the recent window
    pub error_rate: f64,
    /// Circuit breaker state
    pub circuit_state: CircuitState,
    /// Configured on and not disabled by a flag
    pub enabled: bool,
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`Dispatcher`] from configuration and provider implementations
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    providers: Vec<Arc<dyn Provider>>,
    flags: Option<Arc<dyn FlagSource>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl DispatcherBuilder {
    /// Start from a configuration
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            providers: Vec::new(),
            flags: None,
            audit: None,
        }
    }

    /// Register a provider implementation
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Use an external flag store (defaults to [`StaticFlags`])
    #[must_use]
    pub fn flags(mut self, flags: Arc<dyn FlagSource>) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Use an audit sink (defaults to [`TracingAuditSink`])
    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Build the dispatcher
    ///
    /// Providers are tried in configuration declaration order; registered
    /// providers missing from the configuration are appended with default
    /// cost and latency.
    ///
    /// # Errors
    ///
    /// Returns `NoProvidersConfigured` when there is nothing to dispatch to,
    /// and `UnknownProvider` when an enabled configured provider has no
    /// registered implementation.
    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        let mut implementations: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        let mut registration_order = Vec::new();
        for provider in self.providers {
            let name = provider.name().to_string();
            if implementations.contains_key(&name) {
                tracing::warn!(provider = %name, "Provider registered twice, keeping the first");
                continue;
            }
            registration_order.push(name.clone());
            implementations.insert(name, provider);
        }

        let mut config = self.config;
        for profile in &config.providers {
            if profile.enabled && !implementations.contains_key(&profile.name) {
                return Err(DispatchError::UnknownProvider {
                    name: profile.name.clone(),
                });
            }
        }
        for name in registration_order {
            if config.profile(&name).is_none() {
                config.providers.push(ProviderProfile::new(
                    name,
                    DEFAULT_COST_PER_UNIT,
                    DEFAULT_LATENCY_MS,
                ));
            }
        }

        let providers: Vec<(ProviderProfile, Arc<dyn Provider>)> = config
            .providers
            .iter()
            .filter_map(|profile| {
                implementations
                    .get(&profile.name)
                    .map(|p| (profile.clone(), Arc::clone(p)))
            })
            .collect();

        if providers.is_empty() {
            return Err(DispatchError::NoProvidersConfigured);
        }

        let breakers = DashMap::new();
        for (profile, _) in &providers {
            breakers.insert(
                profile.name.clone(),
                Arc::new(CircuitBreaker::new(&profile.name, config.breaker.clone())),
            );
        }

        let profiles: Vec<ProviderProfile> = providers.iter().map(|(p, _)| p.clone()).collect();
        let health = HealthMonitor::new(config.health.clone(), &profiles);
        let cache = ResponseCache::new(config.cache.clone());
        let classifier = TaskClassifier::new(config.task_classes.clone());

        tracing::info!(
            providers = providers.len(),
            strategy = %config.strategy,
            max_retries = config.retry.max_retries,
            "Dispatcher ready"
        );

        Ok(Dispatcher {
            config,
            providers,
            breakers,
            health,
            cache,
            metrics: DispatchMetrics::new(),
            classifier,
            flags: self
                .flags
                .unwrap_or_else(|| Arc::new(StaticFlags::new()) as Arc<dyn FlagSource>),
            audit: self
                .audit
                .unwrap_or_else(|| Arc::new(TracingAuditSink) as Arc<dyn AuditSink>),
        })
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Dispatches requests across providers with fallback, retries and caching
///
/// `Send + Sync`; share it behind an `Arc` and call
/// [`generate_response`](Self::generate_response) from any number of tasks.
pub struct Dispatcher {
    config: DispatcherConfig,
    /// Profiles and implementations in declaration order
    providers: Vec<(ProviderProfile, Arc<dyn Provider>)>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    health: HealthMonitor,
    cache: ResponseCache,
    metrics: DispatchMetrics,
    classifier: TaskClassifier,
    flags: Arc<dyn FlagSource>,
    audit: Arc<dyn AuditSink>,
}

impl Dispatcher {
    /// Start building a dispatcher
    #[must_use]
    pub fn builder(config: DispatcherConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Names of all providers, in declaration order
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|(p, _)| p.name.clone()).collect()
    }

    /// Dispatch a request
    ///
    /// Always returns a response; failures are reported through
    /// `success = false` and `error`.
    pub async fn generate_response(&self, request: &Request) -> Response {
        let request_index = self.metrics.record_request();
        let pending = PendingRequest {
            metrics: &self.metrics,
            request_id: &request.request_id,
            finished: false,
        };
        let response = self.dispatch(request, request_index).await;
        pending.finish();
        response
    }

    async fn dispatch(&self, request: &Request, request_index: u64) -> Response {
        let started = Instant::now();

        let key = self.cache_in_use().then(|| cache_key(request));
        if let Some(key) = &key {
            if let Some(cached) = self.cache.get(key) {
                return self.serve_cached(request, cached, started);
            }
            self.metrics.record_cache_miss();
        }

        let mut candidates = self.candidates();
        if candidates.is_empty() {
            return self.fail(request, started, 0, &DispatchError::NoAvailableProvider);
        }

        let strategy = self.effective_strategy();
        let mut attempts = 0u32;
        let mut last_error: Option<DispatchError> = None;

        for round in 0..self.config.retry.rounds() {
            if round > 0 {
                let backoff = self.config.retry.backoff_for_attempt(round - 1);
                self.metrics.record_retry_round();
                tracing::debug!(
                    request_id = %request.request_id,
                    round,
                    backoff_ms = backoff.as_millis() as u64,
                    "All candidates failed, backing off"
                );
                tokio::time::sleep(backoff).await;

                candidates = self.candidates();
                if candidates.is_empty() {
                    tracing::debug!(request_id = %request.request_id, "No candidates left, giving up");
                    break;
                }
            }

            let order = self.order_candidates(request, &candidates, strategy, request_index);
            tracing::debug!(request_id = %request.request_id, round, order = ?order, "Attempt round");

            for name in &order {
                let (Some(breaker), Some(provider)) = (self.breaker(name), self.provider(name))
                else {
                    continue;
                };
                let Some(permit) = breaker.try_begin() else {
                    tracing::debug!(provider = %name, "Half-open trial already in flight, skipping");
                    continue;
                };

                attempts += 1;
                match self.attempt(request, name, provider, permit).await {
                    Ok(reply) => {
                        return self.succeed(request, name, reply, attempts, started, key);
                    }
                    Err(e) => {
                        tracing::warn!(
                            request_id = %request.request_id,
                            provider = %name,
                            error = %e,
                            "Provider attempt failed"
                        );
                        last_error = Some(e);
                    }
                }
            }
        }

        let last_error = last_error.map_or_else(
            || "no provider could be attempted".to_string(),
            |e| e.to_string(),
        );
        self.fail(
            request,
            started,
            attempts,
            &DispatchError::AllProvidersFailed { last_error },
        )
    }

    /// Invoke one provider and record the outcome
    async fn attempt(
        &self,
        request: &Request,
        name: &str,
        provider: Arc<dyn Provider>,
        permit: BreakerPermit<'_>,
    ) -> Result<ValidReply, DispatchError> {
        self.metrics.record_invocation(name);
        let timeout = self.config.timeout;
        let in_flight = InFlight {
            dispatcher: self,
            provider: name,
            permit: Some(permit),
            started: Instant::now(),
        };

        let outcome = match tokio::time::timeout(timeout, provider.invoke(request)).await {
            Err(_) => Err(DispatchError::Timeout {
                provider: name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(DispatchError::ProviderInvocation {
                provider: name.to_string(),
                message: format!("{e:#}"),
            }),
            Ok(Ok(reply)) => reply.validate(name),
        };

        match outcome {
            Ok(reply) => {
                in_flight.succeed(reply.latency_ms);
                Ok(reply)
            }
            Err(e) => {
                in_flight.fail(e.is_timeout());
                Err(e)
            }
        }
    }

    fn serve_cached(&self, request: &Request, mut cached: Response, started: Instant) -> Response {
        self.metrics.record_cache_hit();
        cached.cached = true;
        cached.attempts = 0;
        cached.request_id.clone_from(&request.request_id);
        cached.processing_time_ms = started.elapsed().as_millis() as u64;

        tracing::debug!(request_id = %request.request_id, "Served from cache");
        self.audit.record(&RoutingEvent::new(
            request.context.correlation_id.clone(),
            RoutingEventKind::ProviderSelected {
                request_id: request.request_id.clone(),
                provider: cached.provider.clone().unwrap_or_default(),
                attempts: 0,
                latency_ms: cached.processing_time_ms,
                cached: true,
            },
        ));
        cached
    }

    fn succeed(
        &self,
        request: &Request,
        provider: &str,
        reply: ValidReply,
        attempts: u32,
        started: Instant,
        key: Option<String>,
    ) -> Response {
        let mut response = Response::success(&request.request_id, provider, reply.content);
        response.tool_calls = reply.tool_calls;
        response.attempts = attempts;
        response.processing_time_ms = started.elapsed().as_millis() as u64;

        if let Some(key) = key {
            self.cache.insert(key, response.clone());
        }

        tracing::info!(
            request_id = %request.request_id,
            provider,
            attempts,
            latency_ms = response.processing_time_ms,
            "Request answered"
        );
        self.audit.record(&RoutingEvent::new(
            request.context.correlation_id.clone(),
            RoutingEventKind::ProviderSelected {
                request_id: request.request_id.clone(),
                provider: provider.to_string(),
                attempts,
                latency_ms: response.processing_time_ms,
                cached: false,
            },
        ));
        response
    }

    fn fail(
        &self,
        request: &Request,
        started: Instant,
        attempts: u32,
        error: &DispatchError,
    ) -> Response {
        self.metrics.record_request_failure();

        let mut response = Response::failure(&request.request_id, error.to_string());
        response.attempts = attempts;
        response.processing_time_ms = started.elapsed().as_millis() as u64;

        tracing::warn!(
            request_id = %request.request_id,
            attempts,
            error = %error,
            "Request failed"
        );
        self.audit.record(&RoutingEvent::new(
            request.context.correlation_id.clone(),
            RoutingEventKind::DispatchFailed {
                request_id: request.request_id.clone(),
                attempts,
                error: error.to_string(),
            },
        ));
        response
    }

    // ------------------------------------------------------------------------
    // Candidate selection
    // ------------------------------------------------------------------------

    fn cache_in_use(&self) -> bool {
        self.cache.is_enabled() && self.flags.is_enabled(FLAG_RESPONSE_CACHE)
    }

    fn effective_strategy(&self) -> Strategy {
        if self.config.smart_routing || self.flags.is_enabled(FLAG_SMART_ROUTING) {
            Strategy::DomainSpecific
        } else {
            self.config.strategy
        }
    }

    fn provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|(p, _)| p.name == name)
            .map(|(_, p)| Arc::clone(p))
    }

    fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    fn is_enabled(&self, profile: &ProviderProfile) -> bool {
        profile.enabled && self.flags.is_provider_enabled(&profile.name)
    }

    /// Providers that may be tried right now, in declaration order
    fn candidates(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter(|(profile, _)| self.is_enabled(profile))
            .filter(|(profile, _)| {
                self.breaker(&profile.name)
                    .is_some_and(|b| b.can_execute())
            })
            .map(|(profile, _)| profile.name.clone())
            .collect()
    }

    fn order_candidates(
        &self,
        request: &Request,
        candidates: &[String],
        strategy: Strategy,
        request_index: u64,
    ) -> Vec<String> {
        let mut ctx = OrderingContext::new(request_index);
        for (profile, _) in &self.providers {
            ctx.costs.insert(profile.name.clone(), profile.cost_per_unit);
            let latency = self
                .health
                .latency_estimate_ms(&profile.name)
                .unwrap_or(profile.default_latency_ms as f64);
            ctx.latencies.insert(profile.name.clone(), latency);
        }
        if strategy == Strategy::DomainSpecific {
            let class = self
                .classifier
                .classify(&request.prompt, &request.context.domain);
            tracing::debug!(request_id = %request.request_id, task_class = %class.name, "Classified request");
            ctx.preferred.clone_from(&class.preferred_providers);
        }

        let ordered = order_providers(candidates, &ctx, strategy);
        apply_preferences(
            ordered,
            |p| self.health.status(p),
            request.provider.as_deref(),
        )
    }

    // ------------------------------------------------------------------------
    // Operator surface
    // ------------------------------------------------------------------------

    /// Health of every provider, in declaration order
    pub fn get_provider_health(&self) -> Vec<ProviderHealthReport> {
        self.providers
            .iter()
            .map(|(profile, _)| {
                let snapshot = self.health.snapshot(&profile.name);
                ProviderHealthReport {
                    provider: profile.name.clone(),
                    status: snapshot.as_ref().map_or(HealthStatus::Unknown, |s| s.status),
                    latency_ms: self
                        .health
                        .latency_estimate_ms(&profile.name)
                        .unwrap_or(profile.default_latency_ms as f64),
                    error_rate: snapshot.as_ref().map_or(0.0, |s| s.error_rate),
                    circuit_state: self
                        .breaker(&profile.name)
                        .map_or(CircuitState::Closed, |b| b.state()),
                    enabled: self.is_enabled(profile),
                }
            })
            .collect()
    }

    /// Aggregate metrics
    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Live metric counters
    #[must_use]
    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    /// Health alerts currently raised
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.health.active_alerts()
    }

    /// Resolve a health alert by ID
    pub fn resolve_alert(&self, id: &str) -> bool {
        self.health.resolve_alert(id)
    }

    /// Circuit state of a provider
    pub fn circuit_state(&self, provider: &str) -> Option<CircuitState> {
        self.breaker(provider).map(|b| b.state())
    }

    /// Close a provider's circuit and clear its health samples
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` for a name that is not configured.
    pub fn reset_provider(&self, provider: &str) -> Result<(), DispatchError> {
        let breaker = self
            .breaker(provider)
            .ok_or_else(|| DispatchError::UnknownProvider {
                name: provider.to_string(),
            })?;
        breaker.reset();
        self.health.reset(provider);
        Ok(())
    }

    /// Drop all cached responses
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

// ============================================================================
// In-flight Bookkeeping
// ============================================================================

/// One provider invocation between its breaker claim and its outcome
///
/// Dropped without an outcome it counts as a failed attempt.
struct InFlight<'a> {
    dispatcher: &'a Dispatcher,
    provider: &'a str,
    permit: Option<BreakerPermit<'a>>,
    started: Instant,
}

impl InFlight<'_> {
    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn succeed(mut self, reported_latency_ms: u64) {
        // Prefer the provider's own latency figure when it reports one
        let latency_ms = if reported_latency_ms > 0 {
            reported_latency_ms
        } else {
            self.elapsed_ms()
        };
        if let Some(permit) = self.permit.take() {
            permit.success();
        }
        let d = self.dispatcher;
        d.health.record_success(self.provider, latency_ms);
        let cost = d
            .config
            .profile(self.provider)
            .map_or(DEFAULT_COST_PER_UNIT, |p| p.cost_per_unit);
        d.metrics.record_success(self.provider, latency_ms, cost);
    }

    fn fail(mut self, is_timeout: bool) {
        if let Some(permit) = self.permit.take() {
            permit.failure();
        }
        self.record_failure(is_timeout);
    }

    fn record_failure(&self, is_timeout: bool) {
        let d = self.dispatcher;
        d.health.record_failure(self.provider, self.elapsed_ms());
        d.metrics.record_attempt_failure(self.provider, is_timeout);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            tracing::warn!(
                provider = %self.provider,
                elapsed_ms = self.elapsed_ms(),
                "Invocation abandoned before completing"
            );
            permit.failure();
            self.record_failure(false);
        }
    }
}

/// A counted request that has not produced a response yet
struct PendingRequest<'a> {
    metrics: &'a DispatchMetrics,
    request_id: &'a str,
    finished: bool,
}

impl PendingRequest<'_> {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(request_id = %self.request_id, "Dispatch dropped before completing");
            self.metrics.record_request_failure();
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("providers", &self.provider_names())
            .field("strategy", &self.config.strategy)
            .field("max_retries", &self.config.retry.max_retries)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RouteTransport for Dispatcher {
    async fn send(&self, request: &Request) -> anyhow::Result<Response> {
        Ok(self.generate_response(request).await)
    }
}
