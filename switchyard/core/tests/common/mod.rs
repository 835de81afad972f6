//! Mock providers and route transports for integration tests
//!
//! Providers are scripted: each one follows a [`Behavior`] that tests can
//! change between requests, and counts every invocation.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use switchyard_core::{
    DispatcherConfig, Provider, ProviderProfile, ProviderReply, Request, Response, RouteTransport,
};

// ============================================================================
// Mock Provider
// ============================================================================

/// What a mock does when invoked
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Answer with content, reporting this latency
    Succeed { latency_ms: u64 },
    /// Return an invocation error
    Fail,
    /// Reply `success = false`
    Reject,
    /// Reply `success = true` with blank content
    Malformed,
    /// Sleep before answering
    Hang(Duration),
}

/// Scripted provider that counts invocations
pub struct MockProvider {
    name: String,
    behavior: Mutex<Behavior>,
    calls: AtomicU32,
}

impl MockProvider {
    pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Mutex::new(behavior),
            calls: AtomicU32::new(0),
        })
    }

    pub fn ok(name: &str) -> Arc<Self> {
        Self::new(name, Behavior::Succeed { latency_ms: 10 })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Self::new(name, Behavior::Fail)
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &Request) -> anyhow::Result<ProviderReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Succeed { latency_ms } => Ok(ProviderReply::ok(
                &self.name,
                format!("{} answered: {}", self.name, request.prompt),
                latency_ms,
            )),
            Behavior::Fail => anyhow::bail!("{} connection refused", self.name),
            Behavior::Reject => Ok(ProviderReply::err(&self.name, "quota exceeded", 5)),
            Behavior::Malformed => Ok(ProviderReply::ok(&self.name, "   ", 5)),
            Behavior::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(ProviderReply::ok(&self.name, "late", 5))
            }
        }
    }
}

/// Dispatcher config with fast backoff and the given `(name, cost)` providers
///
/// Default latencies rise with declaration order so latency ties never occur.
pub fn test_config(providers: &[(&str, f64)]) -> DispatcherConfig {
    let mut config = DispatcherConfig::default();
    config.providers = providers
        .iter()
        .enumerate()
        .map(|(i, (name, cost))| ProviderProfile::new(*name, *cost, 100 * (i as u64 + 1)))
        .collect();
    config.retry.base_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config.timeout = Duration::from_millis(500);
    config
}

// ============================================================================
// Mock Route Transport
// ============================================================================

/// What a mock route does when used
#[derive(Clone, Debug)]
pub enum RouteBehavior {
    Succeed,
    Fail,
    Hang(Duration),
}

/// Scripted route that counts sends
pub struct MockRoute {
    name: String,
    behavior: Mutex<RouteBehavior>,
    sends: AtomicU32,
}

impl MockRoute {
    pub fn new(name: &str, behavior: RouteBehavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Mutex::new(behavior),
            sends: AtomicU32::new(0),
        })
    }

    pub fn set_behavior(&self, behavior: RouteBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteTransport for MockRoute {
    async fn send(&self, request: &Request) -> anyhow::Result<Response> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            RouteBehavior::Succeed => Ok(Response::success(
                &request.request_id,
                &self.name,
                format!("via {}", self.name),
            )),
            RouteBehavior::Fail => Ok(Response::failure(
                &request.request_id,
                format!("{} unreachable", self.name),
            )),
            RouteBehavior::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(Response::success(&request.request_id, &self.name, "late"))
            }
        }
    }
}
