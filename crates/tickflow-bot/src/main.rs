//! tickflow entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Streaming signal detection and trading-decision pipeline
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TICKFLOW_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// CSV tick file to replay, overriding `replay.path`
    #[arg(short, long)]
    replay: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tickflow_telemetry::init_logging()?;

    info!("Starting tickflow v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > TICKFLOW_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("TICKFLOW_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let mut config = tickflow_bot::AppConfig::load(&config_path)?;
    if let Some(path) = args.replay {
        config.replay.path = Some(path);
    }
    info!(
        symbol_workers = config.workers.symbol_workers,
        decision_workers = config.workers.decision_workers,
        replay = ?config.replay.path,
        "Configuration loaded"
    );

    let app = tickflow_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
