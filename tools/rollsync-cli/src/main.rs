//! Rollsync CLI - Tools for the rollback synchronization core
//!
//! # Commands
//!
//! - `rollsync config` - Print the effective configuration
//! - `rollsync loopback` - Play two in-process peers against each other
//!
//! # Usage
//!
//! ```bash
//! # Show where the config file lives
//! rollsync config --path
//!
//! # 600 steps with 3 steps of link latency, peer B running slower
//! rollsync loopback --steps 600 --latency 3 --slow-every 5
//! ```
//!
//! Logging follows `RUST_LOG` (default `info`).

mod config_cmd;
mod loopback;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Rollsync CLI - Tools for the rollback synchronization core
#[derive(Parser)]
#[command(name = "rollsync")]
#[command(about = "Tools for the rollsync synchronization core")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config(config_cmd::ConfigArgs),

    /// Run two peers over an in-process link and report sync statistics
    Loopback(loopback::LoopbackArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(args) => config_cmd::execute(args),
        Commands::Loopback(args) => loopback::execute(args),
    }
}
