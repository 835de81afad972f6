//! Provider Ordering Policy
//!
//! Decides in which order the candidate providers of a request are tried.
//!
//! # Ordering Flow
//!
//! ```text
//! 1. Hard exclusion (flag disabled, circuit open) - done by the caller
//! 2. Strategy ordering: cost, latency, round-robin or task class
//! 3. Soft de-prioritisation: unhealthy providers move to the back
//! 4. Explicit pin: a provider named by the request moves to the front
//! ```
//!
//! Every function here is pure: the same inputs always give the same order,
//! and nothing is carried between calls. The dispatcher re-runs the whole
//! flow at the start of each attempt round.

use std::collections::{HashMap, HashSet};

use super::config::{Strategy, TaskClassRule};
use super::health::HealthStatus;

// ============================================================================
// Ordering Context
// ============================================================================

/// Snapshot of the facts an ordering strategy may use
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrderingContext {
    /// Static cost per provider
    pub costs: HashMap<String, f64>,

    /// Latency estimate per provider (observed, or the configured default)
    pub latencies: HashMap<String, f64>,

    /// Sequence number of the request, used by round-robin
    pub request_index: u64,

    /// Preferred providers of the request's task class
    pub preferred: Vec<String>,
}

impl OrderingContext {
    /// Create an empty context for the given request number
    #[must_use]
    pub fn new(request_index: u64) -> Self {
        Self {
            request_index,
            ..Default::default()
        }
    }

    /// Set a provider's cost
    #[must_use]
    pub fn with_cost(mut self, provider: impl Into<String>, cost: f64) -> Self {
        self.costs.insert(provider.into(), cost);
        self
    }

    /// Set a provider's latency estimate
    #[must_use]
    pub fn with_latency(mut self, provider: impl Into<String>, latency_ms: f64) -> Self {
        self.latencies.insert(provider.into(), latency_ms);
        self
    }

    /// Set the task class preferences
    #[must_use]
    pub fn with_preferred(mut self, preferred: Vec<String>) -> Self {
        self.preferred = preferred;
        self
    }

    fn cost(&self, provider: &str) -> f64 {
        self.costs.get(provider).copied().unwrap_or(f64::INFINITY)
    }

    fn latency(&self, provider: &str) -> f64 {
        self.latencies.get(provider).copied().unwrap_or(f64::INFINITY)
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Order `available` according to `strategy`
///
/// Ties keep the order of `available` (declaration order). The result always
/// contains exactly the providers of `available`.
#[must_use]
pub fn order_providers(available: &[String], ctx: &OrderingContext, strategy: Strategy) -> Vec<String> {
    let mut ordered = available.to_vec();
    if ordered.len() < 2 {
        return ordered;
    }

    match strategy {
        Strategy::CostOptimized => {
            ordered.sort_by(|a, b| ctx.cost(a).total_cmp(&ctx.cost(b)));
        }
        Strategy::LatencyOptimized => {
            ordered.sort_by(|a, b| ctx.latency(a).total_cmp(&ctx.latency(b)));
        }
        Strategy::RoundRobin => {
            let start = (ctx.request_index % ordered.len() as u64) as usize;
            ordered.rotate_left(start);
        }
        Strategy::DomainSpecific => {
            let mut front: Vec<String> = ctx
                .preferred
                .iter()
                .filter(|p| available.contains(p))
                .cloned()
                .collect();
            front.dedup();

            let mut rest: Vec<String> = available
                .iter()
                .filter(|p| !front.contains(p))
                .cloned()
                .collect();
            rest.sort_by(|a, b| ctx.cost(a).total_cmp(&ctx.cost(b)));

            front.extend(rest);
            ordered = front;
        }
    }

    ordered
}

/// Apply soft health signals and the caller's pin to a strategy order
///
/// Unhealthy providers move behind all others (stable). A pinned provider
/// that is among the candidates then moves to the front, even if unhealthy.
#[must_use]
pub fn apply_preferences<F>(ordered: Vec<String>, status_of: F, pinned: Option<&str>) -> Vec<String>
where
    F: Fn(&str) -> HealthStatus,
{
    let (mut result, unhealthy): (Vec<String>, Vec<String>) = ordered
        .into_iter()
        .partition(|p| status_of(p) != HealthStatus::Unhealthy);
    result.extend(unhealthy);

    if let Some(pinned) = pinned {
        if let Some(index) = result.iter().position(|p| p == pinned) {
            let provider = result.remove(index);
            result.insert(0, provider);
        }
    }

    result
}

// ============================================================================
// Task Classification
// ============================================================================

/// Name of the class used when no rule matches
pub const GENERAL_CLASS: &str = "general";

/// Data-driven task classifier
///
/// Rules are evaluated in declaration order. A rule matches when the request
/// domain equals one of its domains, or the prompt contains one of its
/// keywords as a whole word. Multi-word keywords match as substrings.
#[derive(Clone, Debug)]
pub struct TaskClassifier {
    rules: Vec<TaskClassRule>,
    general: TaskClassRule,
}

impl TaskClassifier {
    /// Create a classifier from a rule table
    #[must_use]
    pub fn new(rules: Vec<TaskClassRule>) -> Self {
        let general = rules
            .iter()
            .find(|r| r.name == GENERAL_CLASS)
            .cloned()
            .unwrap_or_else(|| TaskClassRule::new(GENERAL_CLASS));
        Self { rules, general }
    }

    /// The rule table
    #[must_use]
    pub fn rules(&self) -> &[TaskClassRule] {
        &self.rules
    }

    /// Classify a prompt and domain
    #[must_use]
    pub fn classify(&self, prompt: &str, domain: &str) -> &TaskClassRule {
        let prompt_lower = prompt.to_lowercase();
        let words: HashSet<&str> = prompt_lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let domain = domain.trim();

        self.rules
            .iter()
            .find(|rule| {
                let domain_match = !domain.is_empty()
                    && rule.domains.iter().any(|d| d.eq_ignore_ascii_case(domain));
                let keyword_match = rule.keywords.iter().any(|k| {
                    let k = k.to_lowercase();
                    if k.contains(char::is_whitespace) {
                        prompt_lower.contains(&k)
                    } else {
                        words.contains(k.as_str())
                    }
                });
                domain_match || keyword_match
            })
            .unwrap_or(&self.general)
    }
}

impl Default for TaskClassifier {
    fn default() -> Self {
        Self::new(super::config::default_task_classes())
    }
}
