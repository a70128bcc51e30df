//! PostgreSQL backup and WAL archiving tool
//!
//! Resolves configuration for a stanza and dispatches archive-push, archive-pull,
//! backup or expire to the backup engine.

// backrest/src/main.rs
mod archive;
mod backup;
mod cli;
mod config;
mod dispatch;
mod engine;
mod errors;
mod utils;

use clap::Parser;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use dispatch::{Dispatcher, Outcome};
use engine::CommandEngine;
use errors::{AppError, Result};
use utils::launcher::DetachedLauncher;

/// Main entry point. The process is single threaded; the only suspension point
/// is the archive-pull polling sleep.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing();

    match run_app(Cli::parse()).await {
        Ok(outcome) => {
            match outcome {
                Outcome::Completed => info!("operation completed successfully"),
                Outcome::Discarded { stop_file } => {
                    info!(stop_file = %stop_file.display(), "segment discarded")
                }
                Outcome::HandedOff => info!("archive-pull continues in the background"),
                Outcome::AlreadyRunning { lock_path } => {
                    info!(lock = %lock_path.display(), "nothing to do, another process holds the lock")
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_app(cli: Cli) -> Result<Outcome> {
    // Usage errors surface before the configuration file is read.
    let invocation = cli.validate()?;
    let engine = CommandEngine::new().map_err(AppError::engine("engine setup"))?;
    let mut dispatcher = Dispatcher::new(engine, DetachedLauncher);
    dispatcher.run(&invocation).await
}
