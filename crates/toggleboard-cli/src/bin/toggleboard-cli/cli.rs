//! CLI argument parsing and command dispatch.

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Args;
use clap::Parser;
use clap::Subcommand;

use toggleboard_core::BoardStore;
use toggleboard_redis::RedisBoardStore;

use crate::commands::board::BoardCommand;
use crate::commands::freeze::FreezeCommand;
use crate::commands::logs::LogsCommand;

/// Operator CLI for toggle board stores.
#[derive(Parser)]
#[command(name = "toggleboard-cli")]
#[command(version)]
#[command(about = "Operator command-line interface for toggle board stores")]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Commands,
}

/// Global options available to all commands.
#[derive(Args, Clone)]
pub struct GlobalOptions {
    /// Redis primary URL of the board store.
    #[arg(long, env = "TOGGLEBOARD_REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    /// Output JSON instead of human-readable format.
    #[arg(long = "json", global = true)]
    pub is_json: bool,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose", global = true)]
    pub is_verbose: bool,

    /// Suppress all logging output.
    #[arg(short = 'q', long = "quiet", global = true)]
    pub is_quiet: bool,
}

/// Top-level command categories.
#[derive(Subcommand)]
pub enum Commands {
    /// Board counters and settings.
    #[command(subcommand)]
    Board(BoardCommand),

    /// Daily audit lists.
    #[command(subcommand)]
    Logs(LogsCommand),

    /// Freeze maintenance.
    #[command(subcommand)]
    Freeze(FreezeCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn run(self) -> Result<()> {
        let url = self
            .global
            .redis_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--redis-url is required (or set TOGGLEBOARD_REDIS_URL)"))?;
        let store: Arc<dyn BoardStore> =
            Arc::new(RedisBoardStore::connect(url, None).await.context("failed to connect to redis")?);

        let json = self.global.is_json;
        match self.command {
            Commands::Board(cmd) => cmd.run(store.as_ref(), json).await,
            Commands::Logs(cmd) => cmd.run(store.as_ref(), json).await,
            Commands::Freeze(cmd) => cmd.run(store.as_ref(), json).await,
        }
    }
}
