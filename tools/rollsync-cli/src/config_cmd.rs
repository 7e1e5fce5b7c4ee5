//! Config command - show the effective configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use rollsync_core::config::{self, SyncConfig};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Only print the config file location
    #[arg(long)]
    pub path: bool,

    /// Read this file instead of the platform config file
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

/// Load the config from `file` or the platform location.
pub fn load(file: Option<&PathBuf>) -> SyncConfig {
    match file {
        Some(path) => config::load_from(path),
        None => config::load(),
    }
}

pub fn execute(args: ConfigArgs) -> Result<()> {
    if args.path {
        match args.file.clone().or_else(config::config_path) {
            Some(path) => println!("{}", path.display()),
            None => println!("(no config directory on this platform)"),
        }
        return Ok(());
    }

    let config = load(args.file.as_ref());
    if let Err(e) = config.validate() {
        println!("# warning: {e}");
    }
    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
    print!("{rendered}");
    Ok(())
}
