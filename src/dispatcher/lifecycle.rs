//! Graceful shutdown

use super::Dispatcher;
use crate::error::Result;
use crate::types::Event;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// How long shutdown waits for a cancelled run to let go of the lock
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl Dispatcher {
    /// Gracefully shut down the dispatcher
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting submissions and run triggers, and stops the periodic trigger
    /// 2. Cancels the in-flight run, if any, and waits for it to release the run lock
    /// 3. Releases the shared resource
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// Every step runs even if an earlier one fails; the first failure is returned.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown_token.cancel();

        if self.coordinator.cancel_run().await {
            tracing::info!("Cancelled in-flight run");
        }

        let wait = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            while self.coordinator.is_running() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if wait.is_err() {
            tracing::warn!("Timeout waiting for the run lock, releasing resource anyway");
        }

        let released = self.resource.release().await;
        match &released {
            Ok(true) => tracing::info!("Shared resource released"),
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, "Failed to release shared resource"),
        }

        self.emit(Event::Shutdown);
        tracing::info!("Shutdown complete");
        released.map(|_| ())
    }

    /// Whether shutdown has started
    pub fn is_shutting_down(&self) -> bool {
        !self.accepting.load(Ordering::SeqCst)
    }
}
