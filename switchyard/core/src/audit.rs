//! Routing Audit Events
//!
//! Structured records of routing decisions. Sinks are best-effort: a sink
//! that drops or fails to record an event never affects dispatch.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::routing::config::Route;

/// What happened
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoutingEventKind {
    /// A provider answered a dispatched request
    ProviderSelected {
        /// Request ID
        request_id: String,
        /// Provider that answered
        provider: String,
        /// Invocations made
        attempts: u32,
        /// Wall-clock latency
        latency_ms: u64,
        /// Served from the cache
        cached: bool,
    },

    /// No provider could answer a dispatched request
    DispatchFailed {
        /// Request ID
        request_id: String,
        /// Invocations made
        attempts: u32,
        /// Final error text
        error: String,
    },

    /// The hybrid router chose a route
    RouteDecided {
        /// Operation type looked up
        operation_type: String,
        /// Chosen route
        route: Route,
        /// Human-readable reason
        reason: String,
        /// Whether the preferred route was skipped because its circuit is open
        flipped: bool,
    },

    /// A hybrid operation finished
    RouteCompleted {
        /// Operation type
        operation_type: String,
        /// `direct`, `mediated` or `fallback`
        route_path: String,
        /// Routes attempted, in order
        routes_tried: Vec<Route>,
        /// Outcome
        success: bool,
        /// Wall-clock latency
        latency_ms: u64,
    },
}

/// A routing audit event
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoutingEvent {
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,

    /// Correlation ID propagated from the caller
    pub correlation_id: Option<String>,

    /// Event payload
    #[serde(flatten)]
    pub kind: RoutingEventKind,
}

impl RoutingEvent {
    /// Create an event stamped with the current time
    pub fn new(correlation_id: Option<String>, kind: RoutingEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id,
            kind,
        }
    }
}

/// Destination for routing audit events
pub trait AuditSink: Send + Sync {
    /// Record an event (best-effort)
    fn record(&self, event: &RoutingEvent);
}

/// Sink that writes events to `tracing` as JSON
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &RoutingEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::info!(target: "switchyard::audit", event = %json, "routing event"),
            Err(e) => tracing::debug!(error = %e, "Failed to serialize routing event"),
        }
    }
}

/// Events a [`MemoryAuditSink`] keeps by default
pub const DEFAULT_MEMORY_AUDIT_CAPACITY: usize = 1024;

/// Sink that keeps the most recent events in memory for inspection
///
/// Bounded: once `capacity` events are held the oldest is dropped.
#[derive(Debug)]
pub struct MemoryAuditSink {
    events: Mutex<VecDeque<RoutingEvent>>,
    capacity: usize,
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_AUDIT_CAPACITY)
    }
}

impl MemoryAuditSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty sink holding at most `capacity` events
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    /// Copy of the retained events, oldest first
    pub fn events(&self) -> Vec<RoutingEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no events were recorded
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drop all recorded events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &RoutingEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}
