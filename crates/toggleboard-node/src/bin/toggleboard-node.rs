//! toggleboard-node: serves one toggle board over HTTP and WebSocket.
//!
//! Configuration is loaded from environment variables, an optional TOML file
//! and command-line flags, in that order of precedence. Several nodes may
//! share one Redis store; every node runs its own fan-out pipelines.
//!
//! # Usage
//!
//! ```bash
//! # In-memory board on the default port
//! toggleboard-node --initial-count zero
//!
//! # Shared Redis board
//! TOGGLEBOARD_REDIS_URL=redis://127.0.0.1:6379 toggleboard-node --config /etc/toggleboard/node.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::error;
use tracing::info;

use toggleboard_core::InitialCount;
use toggleboard_core::SystemTimeProvider;
use toggleboard_node::BoardNode;
use toggleboard_node::NodeConfig;
use toggleboard_node::config::load_config;
use toggleboard_node::open_store;
use toggleboard_node::server;
use toggleboard_node::telemetry::init_tracing;
use toggleboard_node::telemetry::install_panic_hook;

#[derive(Parser, Debug)]
#[command(name = "toggleboard-node", version, about = "Real-time toggle board server")]
struct Args {
    /// Path to TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address of the HTTP/WebSocket listener.
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Redis primary URL; the board is kept in memory when unset.
    #[arg(long)]
    redis_url: Option<String>,

    /// Redis replica URL for snapshot reads and subscriptions.
    #[arg(long)]
    redis_replica_url: Option<String>,

    /// Number of cells on the board.
    #[arg(long)]
    total_cells: Option<u64>,

    /// Ceiling on the number of checked cells.
    #[arg(long)]
    global_cap: Option<u64>,

    /// Milliseconds a cell stays checked before an uncheck freezes it.
    #[arg(long)]
    freeze_threshold_ms: Option<u64>,

    /// Toggle counter seed for a new board: "cap" or "zero".
    #[arg(long, value_parser = parse_initial_count)]
    initial_count: Option<InitialCount>,

    /// Full-state broadcast interval in milliseconds.
    #[arg(long)]
    snapshot_interval_ms: Option<u64>,

    /// Run the freeze sweeper every N seconds.
    #[arg(long)]
    freeze_sweep_interval_secs: Option<u64>,

    /// Run the audit retention sweep every N seconds.
    #[arg(long)]
    retention_sweep_interval_secs: Option<u64>,

    /// Print the JSON schema of the configuration file and exit.
    #[arg(long)]
    print_config_schema: bool,
}

fn parse_initial_count(value: &str) -> Result<InitialCount, String> {
    match value.to_lowercase().as_str() {
        "cap" => Ok(InitialCount::Cap),
        "zero" => Ok(InitialCount::Zero),
        other => Err(format!("invalid initial count '{other}', expected 'cap' or 'zero'")),
    }
}

/// Apply command-line flags on top of the loaded configuration.
///
/// Every flag that was given replaces the loaded value, including flags equal
/// to the built-in default.
fn apply_cli_overrides(args: &Args, config: &mut NodeConfig) {
    if let Some(addr) = args.http_addr {
        config.network.http_addr = addr;
    }
    if let Some(url) = &args.redis_url {
        config.store.redis_url = Some(url.clone());
    }
    if let Some(url) = &args.redis_replica_url {
        config.store.redis_replica_url = Some(url.clone());
    }
    if let Some(total_cells) = args.total_cells {
        config.board.total_cells = total_cells;
    }
    if let Some(global_cap) = args.global_cap {
        config.board.global_cap = global_cap;
    }
    if let Some(threshold) = args.freeze_threshold_ms {
        config.board.freeze_threshold_ms = threshold;
    }
    if let Some(initial_count) = args.initial_count {
        config.board.initial_count = initial_count;
    }
    if let Some(interval) = args.snapshot_interval_ms {
        config.fanout.snapshot_interval_ms = interval;
    }
    if let Some(interval) = args.freeze_sweep_interval_secs {
        config.fanout.freeze_sweep_interval_secs = interval;
    }
    if let Some(interval) = args.retention_sweep_interval_secs {
        config.audit.retention_sweep_interval_secs = interval;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    install_panic_hook();

    let args = Args::parse();
    if args.print_config_schema {
        let schema = schemars::schema_for!(NodeConfig);
        println!("{}", serde_json::to_string_pretty(&schema).context("failed to render schema")?);
        return Ok(());
    }

    let config = load_config(args.config.as_deref(), |config| apply_cli_overrides(&args, config)).context("failed to load configuration")?;

    let store = open_store(&config.store).await.context("failed to open board store")?;
    let node = BoardNode::start(&config, store, Arc::new(SystemTimeProvider)).await.context("failed to start node")?;

    let listener = server::bind(config.network.http_addr).await?;
    let cancel = node.cancellation_token();
    let server_task = tokio::spawn(server::serve(listener, node.state()));

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = cancel.cancelled() => {}
    }
    node.cancellation_token().cancel();

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "http server stopped with an error"),
        Err(err) => error!(error = %err, "http server task failed"),
    }
    node.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("received SIGTERM, initiating graceful shutdown");
        }
    }
}
