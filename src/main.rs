//! Pagewright command line.

mod cli;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pagewright::EngineConfig;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{cmd_cache, cmd_info, cmd_snapshot, CacheArgs, OutputFormat, SnapshotArgs};

/// Pagewright - browser automation over the DevTools protocol
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or clear the action cache
    Cache(CacheArgs),
    /// Capture an accessibility snapshot of the active page
    Snapshot(SnapshotArgs),
    /// Show build and configuration details
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.debug, cli.log_json)?;

    let config = EngineConfig::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    debug!(?config, "Configuration resolved");

    match cli.command {
        Commands::Cache(args) => cmd_cache(args, &config, cli.output).await,
        Commands::Snapshot(args) => cmd_snapshot(args, config, cli.output).await,
        Commands::Info => cmd_info(&config).await,
    }
}

fn init_logging(level: &str, debug: bool, json: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    let registry = tracing_subscriber::registry().with(filter);
    // stdout carries command output
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}
