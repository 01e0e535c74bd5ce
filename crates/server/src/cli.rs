//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use hub_domain::config::Config;

#[derive(Debug, Parser)]
#[command(
    name = "agent-hub",
    version,
    about = "Local-first hub server for agent coding providers"
)]
pub struct Cli {
    /// Path to the TOML config file (default: ~/.agent-hub/config.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen host override.
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port override.
    #[arg(long)]
    pub port: Option<u16>,

    /// SQLite database path override.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Bind on all interfaces (0.0.0.0) instead of loopback. Explicit
    /// opt-in only.
    #[arg(long)]
    pub public: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server (the default when no subcommand is given).
    Serve,
    /// Print the version and exit.
    Version,
}

/// Load the config file and fold in CLI overrides.
pub fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&path).map_err(|e| anyhow::anyhow!("{e}"))?;

    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(db) = &cli.db {
        config.storage.db_path = Some(db.clone());
    }
    if cli.public {
        config.server.public_bind = true;
    }

    Ok(config)
}
