//! Clowdy Daemon — execution-plane daemon for a self-hosted serverless
//! function platform: builds per-project images, runs function invocations
//! in isolated containers, and routes gateway requests.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cmd;

#[derive(Parser)]
#[command(name = "clowdy-daemon")]
#[command(about = "Clowdy execution-plane daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<cmd::Commands>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("clowdy_daemon={log_level}").into()),
        )
        .init();

    info!("starting clowdy-daemon v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd::Commands::Configure) => {
            cmd::configure::run().await?;
        }
        Some(cmd::Commands::Diagnostics) => {
            cmd::diagnostics::run().await?;
        }
        None => {
            if let Err(e) = cmd::root::run(&cli.config).await {
                error!("daemon error: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
