#![cfg_attr(not(test), forbid(unsafe_code))]

//! `chatlog` command-line entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use server::{ingest, server as http_server};
use shared::config::Config;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "chatlog", version)]
#[command(about = "Chat log ingester and read API", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve the HTTP read API
    Serve {
        /// Port to bind, overriding the configuration
        #[arg(long, short)]
        port: Option<u16>,

        /// Configuration file (.yaml, .yml, .json or .toml)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Log chat from the configured channels until interrupted
    Ingest {
        /// Configuration file (.yaml, .yml, .json or .toml)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

async fn run_ingest(config: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load_config(config.as_deref(), None).context("invalid configuration")?;
    http_server::initialize_tracing(&config);

    let shutdown = CancellationToken::new();
    http_server::spawn_signal_listener(shutdown.clone());

    let summary = ingest::run(config, shutdown).await?;
    info!(persisted = summary.persisted, "done");
    Ok(())
}

async fn run_serve(port: Option<u16>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load_config(config.as_deref(), port).context("invalid configuration")?;
    http_server::run(config).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    match Cli::parse().command {
        Commands::Serve { port, config } => run_serve(port, config).await,
        Commands::Ingest { config } => run_ingest(config).await,
    }
}
