//! Switchyard CLI - Dispatch Configuration Inspector
//!
//! Loads the same configuration a dispatcher would use and answers
//! questions about it without contacting any provider.
//!
//! # Usage
//!
//! ```bash
//! # Validate the default config file and print a summary
//! switchyard check
//!
//! # Which provider order would this prompt get?
//! switchyard order --prompt "Why did the deploy fail?" --strategy smart
//!
//! # Which route does an operation type take?
//! switchyard --json route --operation emergency
//!
//! # Verbose logging
//! RUST_LOG=debug switchyard check
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use switchyard_core::config::{default_config_path, load_config_from_path};
use switchyard_core::routing::{order_providers, OrderingContext, RoutingTable, TaskClassifier};
use switchyard_core::{
    ConfigOverrides, ProviderProfile, RoutingRule, Strategy, SwitchyardConfig,
};

/// Switchyard - inspect provider dispatch and routing configuration
#[derive(Parser, Debug)]
#[command(name = "switchyard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, env = "SWITCHYARD_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate configuration, then print a summary
    Check,

    /// Dry-run provider ordering for a prompt
    Order {
        /// Prompt text
        #[arg(short, long)]
        prompt: String,

        /// Request domain
        #[arg(short, long, default_value = "general")]
        domain: String,

        /// Strategy override (cost, latency, round-robin, smart)
        #[arg(short, long)]
        strategy: Option<Strategy>,

        /// Request sequence number for round-robin
        #[arg(long, default_value_t = 0)]
        request_index: u64,
    },

    /// Print the routing decision for an operation type
    Route {
        /// Operation type (e.g. emergency, batch)
        #[arg(short, long)]
        operation: String,
    },
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Serialize)]
struct CheckSummary {
    source: String,
    config_file: Option<PathBuf>,
    strategy: Strategy,
    smart_routing: bool,
    max_retries: u32,
    timeout_ms: u64,
    cache_enabled: bool,
    providers: Vec<ProviderProfile>,
    routing_rules: Vec<RoutingRule>,
    task_classes: Vec<String>,
}

#[derive(Debug, PartialEq, Serialize)]
struct OrderReport {
    strategy: Strategy,
    task_class: String,
    request_index: u64,
    order: Vec<String>,
}

#[derive(Debug, PartialEq, Serialize)]
struct RouteReport {
    operation_type: String,
    route: String,
    priority: u32,
    reason: String,
}

fn check_summary(config: &SwitchyardConfig) -> CheckSummary {
    let dispatch = &config.dispatch;
    let mut routing_rules = config.hybrid.rules.clone();
    routing_rules.sort_by(|a, b| b.priority.cmp(&a.priority));

    CheckSummary {
        source: config.source().to_string(),
        config_file: config.config_file_path.clone(),
        strategy: dispatch.strategy,
        smart_routing: dispatch.smart_routing,
        max_retries: dispatch.retry.max_retries,
        timeout_ms: dispatch.timeout.as_millis() as u64,
        cache_enabled: dispatch.cache.enabled,
        providers: dispatch.providers.clone(),
        routing_rules,
        task_classes: dispatch.task_classes.iter().map(|c| c.name.clone()).collect(),
    }
}

/// Order enabled providers using only static configuration
fn order_report(
    config: &SwitchyardConfig,
    prompt: &str,
    domain: &str,
    request_index: u64,
) -> OrderReport {
    let dispatch = &config.dispatch;
    let strategy = if dispatch.smart_routing {
        Strategy::DomainSpecific
    } else {
        dispatch.strategy
    };

    let classifier = TaskClassifier::new(dispatch.task_classes.clone());
    let class = classifier.classify(prompt, domain);

    let mut ctx = OrderingContext::new(request_index);
    let mut available = Vec::new();
    for profile in dispatch.providers.iter().filter(|p| p.enabled) {
        ctx = ctx
            .with_cost(&profile.name, profile.cost_per_unit)
            .with_latency(&profile.name, profile.default_latency_ms as f64);
        available.push(profile.name.clone());
    }
    if strategy == Strategy::DomainSpecific {
        ctx = ctx.with_preferred(class.preferred_providers.clone());
    }

    OrderReport {
        strategy,
        task_class: class.name.clone(),
        request_index,
        order: order_providers(&available, &ctx, strategy),
    }
}

fn route_report(config: &SwitchyardConfig, operation: &str) -> Result<RouteReport> {
    let table = RoutingTable::new(config.hybrid.rules.clone())?;
    let rule = table
        .get(operation)
        .with_context(|| format!("No routing rule for operation type '{operation}'"))?;

    Ok(RouteReport {
        operation_type: rule.operation_type.clone(),
        route: rule.route.to_string(),
        priority: rule.priority,
        reason: rule.reason.clone(),
    })
}

// ============================================================================
// Output
// ============================================================================

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_check(summary: &CheckSummary) {
    println!("Configuration OK ({})", summary.source);
    if let Some(path) = &summary.config_file {
        println!("  file:       {}", path.display());
    }
    println!(
        "  strategy:   {}{}",
        summary.strategy,
        if summary.smart_routing { " (smart routing on)" } else { "" }
    );
    println!("  retries:    {}", summary.max_retries);
    println!("  timeout:    {}ms", summary.timeout_ms);
    println!("  cache:      {}", if summary.cache_enabled { "on" } else { "off" });

    println!("Providers ({}):", summary.providers.len());
    for p in &summary.providers {
        println!(
            "  {:<20} cost {:<8} latency {}ms{}",
            p.name,
            p.cost_per_unit,
            p.default_latency_ms,
            if p.enabled { "" } else { "  [disabled]" }
        );
    }

    println!("Routing rules ({}):", summary.routing_rules.len());
    for r in &summary.routing_rules {
        println!("  {:<20} {:<9} priority {}", r.operation_type, r.route.as_str(), r.priority);
    }

    println!("Task classes: {}", summary.task_classes.join(", "));
}

// ============================================================================
// Main
// ============================================================================

/// Logs go to stderr so JSON on stdout stays parseable
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("switchyard=info,switchyard_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load(cli: &Cli) -> Result<SwitchyardConfig> {
    let path = match &cli.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.clone())
        }
        None => default_config_path(),
    };
    debug!(path = ?path, "Loading configuration");
    load_config_from_path(path).context("Failed to load configuration")
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load(&cli)?;

    match cli.command {
        Command::Check => {
            let summary = check_summary(&config);
            if cli.json {
                print_json(&summary)?;
            } else {
                print_check(&summary);
            }
        }
        Command::Order {
            prompt,
            domain,
            strategy,
            request_index,
        } => {
            if let Some(strategy) = strategy {
                ConfigOverrides::new()
                    .with_strategy(strategy)
                    .with_smart_routing(strategy == Strategy::DomainSpecific)
                    .apply(&mut config)?;
            }
            let report = order_report(&config, &prompt, &domain, request_index);
            if cli.json {
                print_json(&report)?;
            } else {
                println!("strategy:   {}", report.strategy);
                println!("task class: {}", report.task_class);
                for (i, name) in report.order.iter().enumerate() {
                    println!("  {}. {name}", i + 1);
                }
            }
        }
        Command::Route { operation } => {
            let report = route_report(&config, &operation)?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "{} -> {} (priority {}): {}",
                    report.operation_type, report.route, report.priority, report.reason
                );
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    run(Cli::parse())
}
