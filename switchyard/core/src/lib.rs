//! Switchyard Core - Resilient Dispatch for AI Inference Providers
//!
//! Sends each inference request to one of several interchangeable providers,
//! tolerating individual provider failures, and routes support operations
//! over two transport paths with single-hop failover.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Callers                              │
//! │        Request (prompt, context)   OperationRequest           │
//! └───────────────┬───────────────────────────┬──────────────────┘
//!                 │                           │
//!                 │                  ┌────────┴────────┐
//!                 │                  │  HybridRouter   │
//!                 │                  │ direct/mediated │
//!                 │                  └────────┬────────┘
//!                 │                           │
//! ┌───────────────┴───────────────────────────┴──────────────────┐
//! │                         Dispatcher                            │
//! │  ┌──────────┐  ┌───────────┐  ┌──────────┐  ┌──────────────┐  │
//! │  │ Response │  │ Ordering  │  │ Circuit  │  │   Health +   │  │
//! │  │  Cache   │  │  Policy   │  │ Breakers │  │   Metrics    │  │
//! │  └──────────┘  └───────────┘  └──────────┘  └──────────────┘  │
//! └───────────────────────────────┬──────────────────────────────┘
//!                                 │
//!                      Provider trait (async)
//! ```
//!
//! # Key Types
//!
//! - [`Dispatcher`]: cache, candidate filtering, ordering and attempt rounds
//! - [`HybridRouter`]: per-operation route choice with failover
//! - [`Provider`]: implemented by each inference backend
//! - [`FlagSource`]: external feature flags and provider enablement
//! - [`AuditSink`]: structured routing events
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use switchyard_core::{load_config, Dispatcher, Request};
//!
//! let config = load_config()?;
//! let dispatcher = Dispatcher::builder(config.dispatch)
//!     .provider(Arc::new(MyProvider::new()))
//!     .build()?;
//!
//! let response = dispatcher
//!     .generate_response(&Request::new("Why did the deploy fail?").with_domain("ops"))
//!     .await;
//! ```
//!
//! # Module Overview
//!
//! - [`routing`]: dispatcher, hybrid router, breakers, cache, health, metrics
//! - [`config`]: TOML file, environment and CLI configuration
//! - [`request`]: requests, contexts and responses
//! - [`provider`]: the provider capability and its reply type
//! - [`flags`]: feature flag capability
//! - [`audit`]: routing audit events and sinks
//! - [`error`]: dispatch errors

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod config;
pub mod error;
pub mod flags;
pub mod provider;
pub mod request;
pub mod routing;

// Re-exports for convenience
pub use audit::{AuditSink, MemoryAuditSink, RoutingEvent, RoutingEventKind, TracingAuditSink};
pub use error::DispatchError;
pub use flags::{FlagSource, StaticFlags, FLAG_RESPONSE_CACHE, FLAG_SMART_ROUTING};
pub use provider::{Provider, ProviderReply, ValidReply};
pub use request::{BudgetTier, Request, RequestContext, Response, ToolCall, ToolSpec};

// Routing exports
pub use routing::{
    BreakerConfig, BreakerPermit, CircuitBreaker, CircuitState, Dispatcher, DispatcherBuilder,
    DispatcherConfig, HealthStatus, HybridConfig, HybridResponse, HybridRouter, MetricsSnapshot,
    OperationRequest, ProviderHealthReport, ProviderProfile, RetryConfig, Route, RoutePath,
    RouteTransport, RoutingDecision, RoutingEfficiency, RoutingRule, Strategy, TaskClassRule,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, SwitchyardConfig, SwitchyardToml,
};
