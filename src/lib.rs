pub mod cli;
pub mod clock;
mod db;
pub mod errors;
pub mod expiry;
pub mod models;
pub mod normalize;
pub mod privacy;
pub mod query;
pub mod report;
pub mod scribe;
pub mod storage;
pub mod store;
pub mod tracker;

pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult};
pub use crate::tracker::{ListedItem, Tracker};

use crate::cli::Cli;
use anyhow::Context;
use clap::Parser;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let data_dir = cli::resolve_data_dir(cli.data_dir.clone());
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    if let Err(error) = init_tracing(&data_dir) {
        eprintln!("logging disabled: {}", error);
    }

    let tracker = Tracker::open(data_dir.clone())
        .with_context(|| format!("failed to open tracker in {}", data_dir.display()))?;
    cli::execute(cli, tracker).await
}

fn init_tracing(data_dir: &Path) -> Result<(), String> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "tracker.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
