//! Hybrid Router
//!
//! Two-route dispatch with single-hop failover.
//!
//! # Flow
//!
//! ```text
//! OperationRequest { operation_type = "emergency" }
//!         |
//!         v
//! RoutingTable lookup -> direct (priority 100)
//!         |
//!         v
//! direct circuit open? -> flip to mediated
//!         |
//!         v
//! try primary route (timeout) --fails--> try other route once
//!         |                                    |
//!         v                                    v
//!   route_path = direct/mediated        route_path = fallback
//! ```
//!
//! The rule table is replaced wholesale: readers clone an `Arc` under a
//! short read lock, writers swap the `Arc` after validation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;

use crate::audit::{AuditSink, RoutingEvent, RoutingEventKind, TracingAuditSink};
use crate::config::{validate_routing_rules, ConfigError};
use crate::error::DispatchError;
use crate::request::{Request, Response};

use super::breaker::{CircuitBreaker, CircuitState};
use super::config::{HybridConfig, Route, RoutingRule};
use super::metrics::Counter;

// ============================================================================
// Transport
// ============================================================================

/// One of the two paths an operation can take
#[async_trait]
pub trait RouteTransport: Send + Sync {
    /// Carry a request over this route
    ///
    /// A response with `success = false` counts as a route failure.
    async fn send(&self, request: &Request) -> anyhow::Result<Response>;
}

// ============================================================================
// Requests and Decisions
// ============================================================================

/// A support operation to route
#[derive(Clone, Debug)]
pub struct OperationRequest {
    /// Key into the routing table (e.g. `emergency`, `batch`)
    pub operation_type: String,
    /// Payload carried by whichever route is chosen
    pub request: Request,
}

impl OperationRequest {
    /// Create an operation
    pub fn new(operation_type: impl Into<String>, request: Request) -> Self {
        Self {
            operation_type: operation_type.into(),
            request,
        }
    }
}

/// Where an operation was sent and why
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    /// Operation type looked up
    pub operation_type: String,
    /// Route to try first
    pub route: Route,
    /// Route the rule asked for
    pub preferred_route: Route,
    /// Rule priority
    pub priority: u32,
    /// Rule reason, or why the route was flipped
    pub reason: String,
    /// The preferred route's circuit was open
    pub flipped: bool,
    /// Correlation ID for audit trails
    pub correlation_id: String,
}

/// Path an operation actually took
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutePath {
    /// Answered by the direct route without failover
    Direct,
    /// Answered by the mediated route without failover
    Mediated,
    /// The other route was tried after the first failed
    Fallback,
}

impl RoutePath {
    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Mediated => "mediated",
            Self::Fallback => "fallback",
        }
    }
}

impl From<Route> for RoutePath {
    fn from(route: Route) -> Self {
        match route {
            Route::Direct => Self::Direct,
            Route::Mediated => Self::Mediated,
        }
    }
}

impl fmt::Display for RoutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a routed operation
#[derive(Clone, Debug, Serialize)]
pub struct HybridResponse {
    /// Whether a route answered successfully
    pub success: bool,
    /// The answering route's response
    pub response: Option<Response>,
    /// Aggregate failure text when both routes failed
    pub error: Option<String>,
    /// Path taken
    ///
    /// When both circuits are open no route is attempted, `routes_tried` is
    /// empty and this names the decided route.
    pub route_path: RoutePath,
    /// Routes attempted, in order
    pub routes_tried: Vec<Route>,
    /// Decision that started the operation
    pub decision: RoutingDecision,
    /// Wall-clock time across all route attempts
    pub latency_ms: u64,
}

/// Route usage summary
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RoutingEfficiency {
    /// Operations executed
    pub total_requests: u64,
    /// Operations that completed on the direct route without failover
    pub direct_route_usage: u64,
    /// Operations that completed on the mediated route without failover
    pub mediated_route_usage: u64,
    /// Operations that failed over to the other route
    pub fallback_usage: u64,
    /// Operations refused because both route circuits were open
    pub unattempted: u64,
    /// Mean wall-clock latency per operation
    pub average_latency_ms: f64,
    /// Share of operations that succeeded
    pub success_rate: f64,
}

// ============================================================================
// Routing Table
// ============================================================================

/// Validated, immutable rule table
#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    rules: HashMap<String, RoutingRule>,
}

impl RoutingTable {
    /// Validate and index rules
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for empty or duplicate operation types.
    pub fn new(rules: Vec<RoutingRule>) -> Result<Self, ConfigError> {
        validate_routing_rules(&rules)?;
        Ok(Self {
            rules: rules
                .into_iter()
                .map(|rule| (rule.operation_type.clone(), rule))
                .collect(),
        })
    }

    /// Rule for an operation type
    pub fn get(&self, operation_type: &str) -> Option<&RoutingRule> {
        self.rules.get(operation_type)
    }

    /// All rules, highest priority first
    pub fn rules(&self) -> Vec<RoutingRule> {
        let mut rules: Vec<RoutingRule> = self.rules.values().cloned().collect();
        rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.operation_type.cmp(&b.operation_type))
        });
        rules
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table has no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ============================================================================
// Router
// ============================================================================

#[derive(Debug, Default)]
struct RouteStats {
    total: Counter,
    direct: Counter,
    mediated: Counter,
    fallback: Counter,
    unattempted: Counter,
    successes: Counter,
    latency_sum_ms: Counter,
}

/// Routes operations over a direct and a mediated transport
pub struct HybridRouter {
    config: HybridConfig,
    table: RwLock<Arc<RoutingTable>>,
    direct: Arc<dyn RouteTransport>,
    mediated: Arc<dyn RouteTransport>,
    direct_breaker: CircuitBreaker,
    mediated_breaker: CircuitBreaker,
    stats: RouteStats,
    audit: Arc<dyn AuditSink>,
}

impl HybridRouter {
    /// Create a router
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the configured rule table is invalid.
    pub fn new(
        config: HybridConfig,
        direct: Arc<dyn RouteTransport>,
        mediated: Arc<dyn RouteTransport>,
    ) -> Result<Self, ConfigError> {
        let table = RoutingTable::new(config.rules.clone())?;
        Ok(Self {
            direct_breaker: CircuitBreaker::new("route:direct", config.breaker.clone()),
            mediated_breaker: CircuitBreaker::new("route:mediated", config.breaker.clone()),
            config,
            table: RwLock::new(Arc::new(table)),
            direct,
            mediated,
            stats: RouteStats::default(),
            audit: Arc::new(TracingAuditSink),
        })
    }

    /// Send routing events to a different sink
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    fn breaker(&self, route: Route) -> &CircuitBreaker {
        match route {
            Route::Direct => &self.direct_breaker,
            Route::Mediated => &self.mediated_breaker,
        }
    }

    fn transport(&self, route: Route) -> &Arc<dyn RouteTransport> {
        match route {
            Route::Direct => &self.direct,
            Route::Mediated => &self.mediated,
        }
    }

    fn table(&self) -> Arc<RoutingTable> {
        Arc::clone(&self.table.read())
    }

    /// Decide which route an operation takes first
    ///
    /// # Errors
    ///
    /// Returns `NoRoutingRule` if the operation type has no rule.
    pub fn make_routing_decision(
        &self,
        operation: &OperationRequest,
        correlation_id: &str,
    ) -> Result<RoutingDecision, DispatchError> {
        let table = self.table();
        let rule = table
            .get(&operation.operation_type)
            .ok_or_else(|| DispatchError::NoRoutingRule {
                operation_type: operation.operation_type.clone(),
            })?;

        let preferred = rule.route;
        let flip = !self.breaker(preferred).can_execute()
            && self.breaker(preferred.other()).can_execute();

        let decision = if flip {
            RoutingDecision {
                operation_type: rule.operation_type.clone(),
                route: preferred.other(),
                preferred_route: preferred,
                priority: rule.priority,
                reason: format!(
                    "{preferred} route circuit open, using {}",
                    preferred.other()
                ),
                flipped: true,
                correlation_id: correlation_id.to_string(),
            }
        } else {
            RoutingDecision {
                operation_type: rule.operation_type.clone(),
                route: preferred,
                preferred_route: preferred,
                priority: rule.priority,
                reason: rule.reason.clone(),
                flipped: false,
                correlation_id: correlation_id.to_string(),
            }
        };

        tracing::debug!(
            operation_type = %decision.operation_type,
            route = %decision.route,
            flipped = decision.flipped,
            correlation_id,
            "Routing decision"
        );
        self.audit.record(&RoutingEvent::new(
            Some(correlation_id.to_string()),
            RoutingEventKind::RouteDecided {
                operation_type: decision.operation_type.clone(),
                route: decision.route,
                reason: decision.reason.clone(),
                flipped: decision.flipped,
            },
        ));

        Ok(decision)
    }

    /// Route an operation, failing over to the other route once
    ///
    /// # Errors
    ///
    /// Returns `NoRoutingRule` if the operation type has no rule. Route
    /// failures are reported in the returned [`HybridResponse`].
    pub async fn execute_support_operation(
        &self,
        operation: &OperationRequest,
    ) -> Result<HybridResponse, DispatchError> {
        let correlation_id = operation
            .request
            .context
            .correlation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let decision = self.make_routing_decision(operation, &correlation_id)?;

        let started = Instant::now();
        let primary = decision.route;
        let mut routes_tried = Vec::with_capacity(2);
        let mut errors = Vec::with_capacity(2);

        let mut outcome = self
            .try_route(primary, &operation.request, &mut routes_tried)
            .await;

        if let Err(e) = &outcome {
            tracing::warn!(
                operation_type = %operation.operation_type,
                route = %primary,
                error = %e,
                correlation_id = %correlation_id,
                "Route failed, trying {}",
                primary.other()
            );
            errors.push(e.clone());
            outcome = self
                .try_route(primary.other(), &operation.request, &mut routes_tried)
                .await;
            if let Err(e) = &outcome {
                errors.push(e.clone());
            }
        }

        let route_path = if routes_tried.contains(&primary.other()) {
            RoutePath::Fallback
        } else {
            RoutePath::from(primary)
        };
        let attempted = !routes_tried.is_empty();
        let latency_ms = started.elapsed().as_millis() as u64;
        let success = outcome.is_ok();

        self.stats.total.inc();
        self.stats.latency_sum_ms.add(latency_ms);
        if success {
            self.stats.successes.inc();
        }
        if attempted {
            match route_path {
                RoutePath::Direct => self.stats.direct.inc(),
                RoutePath::Mediated => self.stats.mediated.inc(),
                RoutePath::Fallback => self.stats.fallback.inc(),
            };
        } else {
            self.stats.unattempted.inc();
        }

        self.audit.record(&RoutingEvent::new(
            Some(correlation_id.clone()),
            RoutingEventKind::RouteCompleted {
                operation_type: operation.operation_type.clone(),
                route_path: route_path.to_string(),
                routes_tried: routes_tried.clone(),
                success,
                latency_ms,
            },
        ));

        let (response, error) = match outcome {
            Ok(response) => (Some(response), None),
            Err(_) => {
                let error = format!("All routes failed: {}", errors.join("; "));
                tracing::warn!(
                    operation_type = %operation.operation_type,
                    correlation_id = %correlation_id,
                    error = %error,
                    "Support operation failed"
                );
                (None, Some(error))
            }
        };

        Ok(HybridResponse {
            success,
            response,
            error,
            route_path,
            routes_tried,
            decision,
            latency_ms,
        })
    }

    /// Attempt one route; `tried` records it only if it was actually invoked
    async fn try_route(
        &self,
        route: Route,
        request: &Request,
        tried: &mut Vec<Route>,
    ) -> Result<Response, String> {
        let Some(permit) = self.breaker(route).try_begin() else {
            return Err(format!("{route} route circuit open"));
        };
        tried.push(route);

        let timeout = self.config.route_timeout;
        let outcome =
            match tokio::time::timeout(timeout, self.transport(route).send(request)).await {
                Err(_) => Err(format!(
                    "{route} route timed out after {}ms",
                    timeout.as_millis()
                )),
                Ok(Err(e)) => Err(format!("{route} route failed: {e:#}")),
                Ok(Ok(response)) if response.success => Ok(response),
                Ok(Ok(response)) => Err(format!(
                    "{route} route failed: {}",
                    response.error.as_deref().unwrap_or("unknown error")
                )),
            };

        match &outcome {
            Ok(_) => permit.success(),
            Err(_) => permit.failure(),
        }
        outcome
    }

    /// Replace the whole rule table
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` and leaves the current table in place if
    /// the new rules are invalid.
    pub fn update_routing_rules(&self, rules: Vec<RoutingRule>) -> Result<(), ConfigError> {
        let table = Arc::new(RoutingTable::new(rules)?);
        let count = table.len();
        *self.table.write() = table;
        tracing::info!(rules = count, "Routing rules replaced");
        Ok(())
    }

    /// Current rules, highest priority first
    pub fn routing_rules(&self) -> Vec<RoutingRule> {
        self.table().rules()
    }

    /// Circuit state of a route
    pub fn route_state(&self, route: Route) -> CircuitState {
        self.breaker(route).state()
    }

    /// Close a route's circuit
    pub fn reset_route(&self, route: Route) {
        self.breaker(route).reset();
    }

    /// Route usage summary
    pub fn get_routing_efficiency(&self) -> RoutingEfficiency {
        let total = self.stats.total.get();
        let ratio = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 };
        RoutingEfficiency {
            total_requests: total,
            direct_route_usage: self.stats.direct.get(),
            mediated_route_usage: self.stats.mediated.get(),
            fallback_usage: self.stats.fallback.get(),
            unattempted: self.stats.unattempted.get(),
            average_latency_ms: ratio(self.stats.latency_sum_ms.get()),
            success_rate: ratio(self.stats.successes.get()),
        }
    }
}

impl fmt::Debug for HybridRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridRouter")
            .field("rules", &self.table().len())
            .field("direct", &self.direct_breaker.state())
            .field("mediated", &self.mediated_breaker.state())
            .finish_non_exhaustive()
    }
}
