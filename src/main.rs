//! Main entry point for the view-harvester CLI

use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use view_harvester::cli::{Cli, Commands};
use view_harvester::shutdown::{SharedShutdown, ShutdownCoordinator};

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("view_harvester=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(cli: Cli, shutdown: SharedShutdown) -> anyhow::Result<()> {
    if let Some(addr) = cli.metrics_addr {
        view_harvester::metrics::init_metrics(addr)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("failed to start metrics exporter")?;
    }

    match &cli.command {
        Commands::Harvest(args) => args.execute(&cli, shutdown).await?,
        Commands::Plan(args) => args.execute(&cli).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    // Ctrl+C stops admissions and lets in-flight requests finish
    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - finishing in-flight requests...");
                shutdown.request_shutdown_with_reason("interrupted by Ctrl+C");
            }
        }
    });

    if let Err(e) = run(cli, shutdown).await {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
