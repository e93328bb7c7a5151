//! toggleboard-cli: operator tool for a toggle board store.
//!
//! Talks to the shared Redis store directly, so it works while nodes are
//! running and while none are.
//!
//! # Usage
//!
//! ```bash
//! # Counters, threshold and store time
//! toggleboard-cli --redis-url redis://127.0.0.1:6379 board status
//!
//! # Recount the bitsets after seeding the counter at the cap
//! toggleboard-cli board reconcile
//!
//! # Drop audit lists older than a week, JSON for scripting
//! toggleboard-cli --json logs cleanup --days 7 | jq '.expired'
//! ```

mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

/// Initialize tracing; `-q` silences it and `-v` enables debug output.
fn init_tracing(quiet: bool, verbose: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).compact().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.global.is_quiet, cli.global.is_verbose);

    cli.run().await
}
