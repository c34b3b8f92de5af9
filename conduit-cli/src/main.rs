//! Conduit CLI Tool
//!
//! Command line interface for inspecting Conduit configuration

use anyhow::Result;
use clap::{Parser, Subcommand};
use conduit_core::config::loader::load_config_from_path;
use conduit_core::{Config, Route};
use conduit_loadbalance::SelectorRegistry;
use std::collections::BTreeMap;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conduit-cli")]
#[command(about = "A CLI tool for inspecting Conduit RPC client configuration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    ValidateConfig {
        /// Path to configuration file
        #[arg(short, long, default_value = "conduit.toml")]
        config: String,
    },
    /// List configured service routes and endpoints
    Routes {
        /// Path to configuration file
        #[arg(short, long, default_value = "conduit.toml")]
        config: String,
    },
    /// Dry-run endpoint selection for an operation
    Select {
        /// Path to configuration file
        #[arg(short, long, default_value = "conduit.toml")]
        config: String,
        /// Operation id to select endpoints for
        #[arg(short, long)]
        operation: String,
        /// Number of selections to perform
        #[arg(short = 'n', long, default_value_t = 10)]
        times: usize,
        /// Hash key used by consistent hashing
        #[arg(long)]
        hash_key: Option<String>,
        /// Pin selection to an endpoint address (host:port)
        #[arg(long)]
        pin: Option<String>,
    },
    /// Generate example configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "conduit_example.toml")]
        output: String,
    },
}

impl Commands {
    fn config_path(&self) -> Option<&str> {
        match self {
            Commands::ValidateConfig { config }
            | Commands::Routes { config }
            | Commands::Select { config, .. } => Some(config),
            Commands::GenerateConfig { .. } => None,
        }
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = cli
        .command
        .config_path()
        .and_then(|path| load_config_from_path(path).ok())
        .map(|cfg| cfg.settings.log_level)
        .unwrap_or_else(|| "info".to_string());
    init_tracing(&log_level);

    match cli.command {
        Commands::ValidateConfig { config } => {
            println!("Validating configuration file: {}", config);
            match load_config_from_path(&config) {
                Ok(cfg) => {
                    println!("✅ Configuration is valid");
                    println!("  - {} services configured", cfg.services.len());
                    println!(
                        "  - {} endpoints configured",
                        cfg.services.values().map(|s| s.endpoints.len()).sum::<usize>()
                    );
                    println!("  - {} operations configured", cfg.operations.len());
                }
                Err(e) => {
                    eprintln!("❌ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Routes { config } => {
            let cfg = load_config_from_path(&config)?;
            show_routes(&cfg);
        }
        Commands::Select {
            config,
            operation,
            times,
            hash_key,
            pin,
        } => {
            let cfg = load_config_from_path(&config)?;
            dry_run_selection(&cfg, &operation, times, hash_key.as_deref(), pin.as_deref())?;
        }
        Commands::GenerateConfig { output } => {
            println!("Generating configuration file: {}", output);
            std::fs::write(&output, EXAMPLE_CONFIG)?;
            println!("✅ Configuration file generated successfully");
        }
    }

    Ok(())
}

/// 输出路由表
fn show_routes(cfg: &Config) {
    let mut routes: Vec<Route> = cfg.build_routes();
    routes.sort_by(|a, b| a.service_id.cmp(&b.service_id));

    for route in routes {
        let status = if route.is_routable() { "✅" } else { "❌" };
        println!(
            "{} {} ({}/{} endpoints enabled)",
            status,
            route.service_id,
            route.enabled_endpoints().len(),
            route.endpoints.len()
        );
        for endpoint in &route.endpoints {
            let state = match (endpoint.enabled, endpoint.last_disabled_at) {
                (true, _) => "enabled".to_string(),
                (false, Some(at)) => format!("disabled since {}", at.to_rfc3339()),
                (false, None) => "disabled".to_string(),
            };
            println!("    {} weight={} {}", endpoint, endpoint.weight, state);
        }
    }
}

/// 模拟多次端点选择并输出分布
fn dry_run_selection(
    cfg: &Config,
    operation_id: &str,
    times: usize,
    hash_key: Option<&str>,
    pin: Option<&str>,
) -> Result<()> {
    let operations = cfg.build_operations()?;
    let operation = operations
        .iter()
        .find(|op| op.id() == operation_id)
        .ok_or_else(|| anyhow::anyhow!("Operation '{}' is not configured", operation_id))?;

    let route = cfg
        .build_routes()
        .into_iter()
        .find(|r| r.service_id == operation.service_id())
        .ok_or_else(|| anyhow::anyhow!("Service '{}' has no route", operation.service_id()))?;

    let strategy = operation.governance().selector_name();
    println!(
        "Selecting endpoints for '{}' (service '{}', strategy '{}')",
        operation.id(),
        operation.service_id(),
        strategy
    );

    if !route.is_routable() {
        eprintln!("❌ Service '{}' has no enabled endpoint", route.service_id);
        std::process::exit(1);
    }

    let registry =
        SelectorRegistry::with_virtual_nodes(cfg.settings.consistent_hash_virtual_nodes);
    let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
    for _ in 0..times {
        let endpoint = registry
            .select_for_route(&route, operation.id(), strategy, hash_key, pin)
            .map_err(|e| anyhow::anyhow!("Selection failed: {}", e))?;
        *distribution.entry(endpoint.address()).or_insert(0) += 1;
    }

    for (address, count) in &distribution {
        let share = if times > 0 {
            *count as f64 * 100.0 / times as f64
        } else {
            0.0
        };
        println!("  {:<24} {:>6} ({:.1}%)", address, count, share);
    }

    if let Ok(json) = serde_json::to_string(&distribution) {
        tracing::debug!("Selection distribution: {}", json);
    }

    Ok(())
}

const EXAMPLE_CONFIG: &str = r#"# Conduit RPC Client Configuration File

[settings]
# random | round_robin (polling) | consistent_hash (hash_algorithm) | weighted
default_strategy = "round_robin"
consistent_hash_virtual_nodes = 160
cache_ttl_seconds = 300
cache_max_entries = 10000
log_level = "info"

[services.user]
[[services.user.endpoints]]
host = "10.0.0.1"
port = 2200
protocol = "tcp"
weight = 1.0

[[services.user.endpoints]]
host = "10.0.0.2"
port = 2200
protocol = "tcp"
weight = 2.0

[services.order]
[[services.order.endpoints]]
host = "10.0.1.1"
port = 2200
protocol = "tcp"

# Cached lookup, one entry per tenant and user id
[operations."user.get"]
service = "user"
parameters = ["id"]
strategy = "weighted"

[[operations."user.get".cache_rules]]
method = "get"
key_template = "user:{id}"
cache_name = "users"

# Renaming a user drops the cached lookup and every cached list page
[operations."user.rename"]
service = "user"
parameters = ["id", "name"]

[[operations."user.rename".cache_rules]]
method = "remove"
key_template = "user:{id}"
cache_name = "users"

[[operations."user.rename".cache_rules]]
method = "remove"
key_template = "list:"
cache_name = "users"
match_by_prefix = true

# Transactional operation routed by order id, settled by order.confirm / order.cancel
[operations."order.place"]
service = "order"
parameters = ["order"]
strategy = "consistent_hash"
hash_key = "order"
transaction = true
confirm = "order.confirm"
cancel = "order.cancel"

[operations."order.confirm"]
service = "order"
parameters = ["order"]
strategy = "consistent_hash"
hash_key = "order"

[operations."order.cancel"]
service = "order"
parameters = ["order"]
strategy = "consistent_hash"
hash_key = "order"
"#;
