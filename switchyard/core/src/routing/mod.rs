//! Provider Dispatch and Hybrid Routing
//!
//! Resilience layer between callers and AI inference providers.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |   HybridRouter   |  <-- direct / mediated failover per operation type
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! |    Dispatcher    |  <-- cache, candidate filtering, attempt rounds
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! |  Ordering Policy |  <-- cost / latency / round-robin / domain-specific
//! +--------+---------+
//!          |
//!    +-----+-----+
//!    |     |     |
//!    v     v     v
//! +----+ +----+ +----+
//! | P1 | | P2 | | P3 |  <-- Provider implementations, each behind a breaker
//! +----+ +----+ +----+
//! ```
//!
//! Health samples and metrics are recorded on every attempt; ordering is
//! recomputed from them at the start of each round.

pub mod breaker;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod health;
pub mod hybrid;
pub mod metrics;
pub mod policy;

pub use breaker::{BreakerConfig, BreakerPermit, CircuitBreaker, CircuitState};
pub use cache::{cache_key, CacheConfig, CacheStats, ResponseCache};
pub use config::*;
pub use dispatcher::{Dispatcher, DispatcherBuilder, ProviderHealthReport};
pub use health::{
    Alert, AlertCategory, AlertSeverity, HealthConfig, HealthMonitor, HealthSnapshot,
    HealthStatus,
};
pub use hybrid::{
    HybridResponse, HybridRouter, OperationRequest, RoutePath, RouteTransport, RoutingDecision,
    RoutingEfficiency, RoutingTable,
};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use policy::{apply_preferences, order_providers, OrderingContext, TaskClassifier};
