//! # Main Entry Point
//!
//! Loads configuration, sets up logging, and dispatches the CLI.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use scaffold::domain::config::AppConfig;
use scaffold::interface::cli::{self, Cli};

const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load Configuration
    let config = AppConfig::load(cli.config.as_deref())?;

    // 2. Logging Setup
    std::fs::create_dir_all(&config.logging.dir)
        .with_context(|| format!("Failed to create log directory {}", config.logging.dir))?;

    let file_appender = tracing_appender::rolling::never(&config.logging.dir, "scaffold.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let filter = config.logging.filter.as_deref().unwrap_or(DEFAULT_FILTER);
        tracing_subscriber::EnvFilter::try_new(filter)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER))
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    // stdout carries command results
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::debug!("Configuration loaded");

    // 3. Dispatch
    cli::run(cli, config).await
}
