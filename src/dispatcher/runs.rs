//! Run triggering, cancellation, periodic runs, resource and reload control

use super::Dispatcher;
use crate::drivers::ReloadOutcome;
use crate::error::{Error, Result};
use crate::resource::ResourceHandle;
use crate::types::RunOutcome;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;

impl Dispatcher {
    /// Run pending work now and wait for the outcome
    ///
    /// A concurrent caller observes `Skipped(Locked)`.
    pub async fn run_pending(&self) -> Result<RunOutcome> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        Ok(self.coordinator.run().await)
    }

    /// Run pending work on a background task
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once shutdown has started; nothing is spawned.
    pub fn spawn_run(&self) -> Result<JoinHandle<RunOutcome>> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let coordinator = self.coordinator.clone();
        Ok(tokio::spawn(async move { coordinator.run().await }))
    }

    /// Start the periodic trigger if `execution.run_interval` is configured
    ///
    /// Ticks that find a run in progress are skipped. The loop stops at shutdown.
    pub fn start_periodic_runs(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.execution.run_interval?;
        Some(self.spawn_periodic(interval))
    }

    pub(crate) fn spawn_periodic(&self, period: Duration) -> JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        let shutdown = self.shutdown_token.clone();

        tokio::spawn(async move {
            tracing::info!(interval_secs = period.as_secs_f64(), "Periodic run trigger started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcome = coordinator.run().await;
                        if outcome.is_locked() {
                            tracing::debug!("Periodic run skipped, another run is in progress");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        break;
                    }
                }
            }
            tracing::info!("Periodic run trigger stopped");
        })
    }

    /// Whether a run currently holds the run lock
    pub fn is_running(&self) -> bool {
        self.coordinator.is_running()
    }

    /// Cancel the in-flight run; returns whether one was running
    pub async fn cancel_run(&self) -> bool {
        let cancelled = self.coordinator.cancel_run().await;
        if cancelled {
            tracing::info!("Run cancellation requested");
        }
        cancelled
    }

    /// Re-instantiate the configured drivers and re-read their templates
    ///
    /// The set of drivers is the one configured at startup. Deferred until the current run ends when one is in progress.
    pub async fn reload_drivers(&self) -> Result<ReloadOutcome> {
        self.coordinator.reload_drivers().await
    }

    /// Start the shared resource ahead of the next run
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] while a run is in progress.
    pub async fn init_resource(&self) -> Result<ResourceHandle> {
        self.coordinator.init_resource().await
    }

    /// Tear down the shared resource; returns whether anything was live
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] while a run is in progress.
    pub async fn dispose_resource(&self) -> Result<bool> {
        self.coordinator.dispose_resource().await
    }

    /// The live resource handle, if any
    pub async fn resource(&self) -> Option<ResourceHandle> {
        self.resource.current().await
    }
}
