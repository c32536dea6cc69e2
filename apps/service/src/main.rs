mod config;
mod history;
mod monitoring;
mod notify;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use config::Config;
use history::HistoryLog;
use monitoring::{CheckScheduler, HttpChecker, ProbeExecutor, ResultSink, SchedulerConfig};
use store::FileStore;

/// Periodically probes registered checks and alerts on up/down transitions
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the config file (defaults to $XDG_CONFIG_HOME/upcheck/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    logger::init();

    if let Err(e) = run(Args::parse()).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_config(args.config.as_deref()).context("Failed to load configuration")?;

    if args.print_config {
        print!("{config}");
        return Ok(());
    }

    let store = Arc::new(
        FileStore::open(&config.store.data_dir)
            .await
            .with_context(|| format!("Cannot open record store at {}", config.store.data_dir.display()))?,
    );
    let history = HistoryLog::open(&config.store.logs_dir)
        .await
        .with_context(|| format!("Cannot open history logs at {}", config.store.logs_dir.display()))?;
    let notifier = notify::from_config(&config.sms).context("Failed to set up notifications")?;

    let executor = ProbeExecutor::new(Arc::new(HttpChecker::new()?));
    let sink = ResultSink::new(store.clone(), history, Arc::from(notifier));
    let scheduler = Arc::new(CheckScheduler::new(
        store,
        Arc::new(executor),
        Arc::new(sink),
        SchedulerConfig {
            interval: Duration::from_secs(config.scheduler.interval_seconds),
            max_concurrent_probes: config.scheduler.max_concurrent_probes,
            max_timeout_seconds: config.checks.max_timeout_seconds,
        },
    ));

    if args.once {
        scheduler.run_once().await.context("Record store is unreachable")?;
        return Ok(());
    }

    info!(
        "Starting check scheduler (every {}s, up to {} concurrent probes)",
        config.scheduler.interval_seconds, config.scheduler.max_concurrent_probes
    );
    let handle = scheduler.start().await.context("Record store is unreachable")?;

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, stopping scheduler");
    handle.abort();

    Ok(())
}
