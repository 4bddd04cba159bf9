//! # batch-dispatch
//!
//! Task-batching scheduler that feeds external worker plugins.
//!
//! Submissions are deduplicated into a SQLite backlog. Each run groups the
//! pending records into per-driver batches, publishes every batch payload to a
//! downstream queue and drives the batch through its driver's
//! `prepare`/`handle`/`collect` lifecycle on a shared execution resource.
//! Completion is reconciled back into the store.
//!
//! ## Quick Start
//!
//! ```no_run
//! use batch_dispatch::{Config, Dispatcher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file(std::path::Path::new("batch-dispatch.toml"))?;
//!     let dispatcher = Dispatcher::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = dispatcher.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = dispatcher.submit_single("https://example.com/article/1").await?;
//!     println!("accepted {} record(s)", report.accepted.len());
//!
//!     let outcome = dispatcher.run_pending().await?;
//!     println!("run outcome: {:?}", outcome);
//!
//!     dispatcher.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Batch planning: merge policy and download-directory partitions
pub mod batching;
/// Downstream queue publishing
pub mod bridge;
/// Configuration types
pub mod config;
/// Single-flight run execution and completion reconciliation
pub mod coordinator;
/// Database persistence layer
pub mod db;
/// Submission deduplication
pub mod dedup;
/// Dispatcher facade (decomposed into focused submodules)
pub mod dispatcher;
/// Driver plugins and the driver registry
pub mod drivers;
/// Error types
pub mod error;
/// Shared execution resource lifecycle
pub mod resource;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// Re-export commonly used types
pub use bridge::{MemoryQueueBridge, QueueBridge, RedisQueueBridge};
pub use config::Config;
pub use db::{Database, NewTask};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use drivers::{BatchContext, Driver, DriverCatalog, DriverRegistry, PluginReturn, ReloadOutcome};
pub use error::{
    ApiError, DatabaseError, Error, ErrorDetail, Phase, PluginError, Result, ToHttpStatus,
};
pub use resource::{ResourceHandle, ResourceManager};
pub use types::{
    AcceptedTask, DriverInfo, Event, RejectedTask, RunOutcome, SkipReason, SubmissionKind,
    SubmissionReport, TaskId, TaskRecord, TaskStatus,
};

/// Serve the dispatcher until a termination signal arrives, then shut down gracefully.
///
/// Starts the periodic run trigger (when `execution.run_interval` is set) and the
/// REST API server. On a signal, or if the API server stops on its own, the server
/// is stopped and [`Dispatcher::shutdown`] releases the shared resource.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use batch_dispatch::{Config, Dispatcher, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let dispatcher = Dispatcher::new(Config::default()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(dispatcher).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(dispatcher: Dispatcher) -> Result<()> {
    let dispatcher = Arc::new(dispatcher);
    let config = Arc::new(dispatcher.config().clone());

    let periodic = dispatcher.start_periodic_runs();

    let server_token = CancellationToken::new();
    let mut server = tokio::spawn(api::start_api_server(
        dispatcher.clone(),
        config,
        server_token.clone(),
    ));

    let stopped_early = tokio::select! {
        _ = wait_for_signal() => None,
        joined = &mut server => {
            tracing::error!("API server stopped unexpectedly");
            Some(joined)
        }
    };

    server_token.cancel();
    let shutdown = dispatcher.shutdown().await;

    if let Some(handle) = periodic {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Periodic trigger task failed");
        }
    }

    let joined = match stopped_early {
        Some(joined) => joined,
        None => server.await,
    };
    let served = joined
        .map_err(|e| Error::ApiServerError(e.to_string()))
        .and_then(|result| result);

    shutdown.and(served)
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
