//! # batch-dispatch
//!
//! Runs the dispatcher with its REST API and optional periodic run trigger.
//!
//! ```bash
//! batch-dispatch --config /etc/batch-dispatch.toml
//! BATCH_DISPATCH_CONFIG=./dispatch.toml batch-dispatch --log-json
//! ```

use batch_dispatch::{Config, Dispatcher, run_with_shutdown};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Task-batching scheduler for external worker plugins.
#[derive(Debug, Parser)]
#[command(name = "batch-dispatch")]
#[command(version)]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long, env = "BATCH_DISPATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Emit JSON structured logs.
    #[arg(long)]
    log_json: bool,
}

fn init_logging(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

async fn run(args: Args) -> batch_dispatch::Result<()> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    tracing::info!(
        namespace = %config.extensions.namespace,
        drivers = config.extensions.drivers.len(),
        database = %config.persistence.database_path.display(),
        "Starting batch-dispatch"
    );

    let dispatcher = Dispatcher::new(config).await?;
    run_with_shutdown(dispatcher).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_json);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "batch-dispatch failed");
            ExitCode::FAILURE
        }
    }
}
