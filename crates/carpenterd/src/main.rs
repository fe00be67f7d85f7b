//! Carpenter build worker daemon.

use anyhow::Context;
use carpenter_config::{WorkerConfig, load_worker_config};
use carpenter_local::open_source;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "carpenterd")]
#[command(about = "Carpenter build worker", long_about = None)]
struct Cli {
    /// Path to the worker configuration file
    #[arg(long, short, env = "CARPENTER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the worker environment
    #[arg(long, env = "CARPENTER_ENV")]
    env: Option<String>,

    /// Override the number of concurrent jobs
    #[arg(long)]
    concurrency: Option<usize>,

    /// Read jobs from this file instead of the configured source ("-" for stdin)
    #[arg(long)]
    source: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_worker_config(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    if let Some(env) = cli.env {
        config.env = env;
    }
    if let Some(concurrency) = cli.concurrency {
        anyhow::ensure!(concurrency > 0, "concurrency must be positive");
        config.concurrency = concurrency;
    }
    if let Some(source) = cli.source {
        config.source = Some(source);
    }

    carpenterd::telemetry::init(config.is_development());

    let jobs = open_source(config.source.as_deref())
        .await
        .context("failed to open job source")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    carpenterd::run(config, jobs, shutdown).await?;
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received, draining jobs");
    shutdown.cancel();
}
