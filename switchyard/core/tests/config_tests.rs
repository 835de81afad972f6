//! Configuration to dispatcher wiring

mod common;

use std::io::Write;

use common::MockProvider;
use switchyard_core::config::load_config_with_env;
use switchyard_core::{
    ConfigOverrides, DispatchError, Dispatcher, HybridRouter, Request, Route, Strategy,
};
use tempfile::NamedTempFile;

const CONFIG: &str = r#"
[dispatch]
strategy = "cost-optimized"
max_retries = 1
timeout_ms = 500

[retry]
base_backoff_ms = 1
max_backoff_ms = 2

[[providers]]
name = "expensive"
cost_per_unit = 3.0

[[providers]]
name = "budget"
cost_per_unit = 0.5

[[routing_rules]]
operation_type = "escalation"
route = "direct"
priority = 50
"#;

fn config_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_file_config_drives_dispatch() {
    let file = config_file();
    let config = load_config_with_env(Some(file.path().to_path_buf()), |_| None).unwrap();

    let budget = MockProvider::ok("budget");
    let expensive = MockProvider::ok("expensive");
    let dispatcher = Dispatcher::builder(config.dispatch)
        .provider(expensive.clone())
        .provider(budget.clone())
        .build()
        .unwrap();

    assert_eq!(dispatcher.provider_names(), vec!["expensive", "budget"]);
    let response = dispatcher.generate_response(&Request::new("hi")).await;
    assert_eq!(response.provider.as_deref(), Some("budget"));
}

#[tokio::test]
async fn test_env_strategy_overrides_file() {
    let file = config_file();
    let config = load_config_with_env(Some(file.path().to_path_buf()), |key| {
        (key == "SWITCHYARD_STRATEGY").then(|| "latency_optimized".to_string())
    })
    .unwrap();

    assert_eq!(config.dispatch.strategy, Strategy::LatencyOptimized);

    let dispatcher = Dispatcher::builder(config.dispatch)
        .provider(MockProvider::ok("expensive"))
        .provider(MockProvider::ok("budget"))
        .build()
        .unwrap();

    // Both default to the same latency: declaration order breaks the tie
    let response = dispatcher.generate_response(&Request::new("hi")).await;
    assert_eq!(response.provider.as_deref(), Some("expensive"));
}

#[test]
fn test_configured_provider_without_implementation() {
    let file = config_file();
    let config = load_config_with_env(Some(file.path().to_path_buf()), |_| None).unwrap();

    let result = Dispatcher::builder(config.dispatch)
        .provider(MockProvider::ok("budget"))
        .build();

    assert!(matches!(
        result,
        Err(DispatchError::UnknownProvider { name }) if name == "expensive"
    ));
}

#[test]
fn test_file_routing_rules_replace_defaults() {
    let file = config_file();
    let mut config = load_config_with_env(Some(file.path().to_path_buf()), |_| None).unwrap();
    ConfigOverrides::new()
        .with_max_retries(0)
        .apply(&mut config)
        .unwrap();

    let router = HybridRouter::new(
        config.hybrid,
        common::MockRoute::new("direct", common::RouteBehavior::Succeed),
        common::MockRoute::new("mediated", common::RouteBehavior::Succeed),
    )
    .unwrap();

    let rules = router.routing_rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].operation_type, "escalation");
    assert_eq!(rules[0].route, Route::Direct);
}
