//! Shared execution resource
//!
//! One expensive resource (for example a browser automation session) is shared by every
//! batch of a run and survives across runs until it is explicitly disposed. It may depend
//! on an auxiliary display subsystem, which is started first and stopped last.
//!
//! At most one live [`ResourceHandle`] exists per [`ResourceManager`]:
//! [`ResourceManager::acquire`] returns the live handle when there is one, and
//! [`ResourceManager::release`] is a no-op when nothing is live.

use crate::config::ResourceConfig;
use crate::error::{Error, Result};
use crate::types::Event;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast};

mod process;

pub use process::{EndpointLauncher, ManagedProcess, ProcessDisplay, ProcessLauncher};

/// Read-only view of the live resource, shared by all batches of a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceHandle {
    generation: u64,
    endpoint: Option<String>,
    display: Option<String>,
}

impl ResourceHandle {
    /// Increments each time the resource is started
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Where drivers reach the resource, if it exposes an address
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// X display the resource runs on, when a display subsystem is configured
    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            generation: 0,
            endpoint: None,
            display: None,
        }
    }
}

/// Starts and stops the resource itself
#[async_trait]
pub trait ResourceLauncher: Send + Sync {
    /// Start the resource, returning its endpoint
    ///
    /// `display` is the X display to use when a display subsystem is running.
    async fn start(&self, display: Option<&str>) -> Result<Option<String>>;

    /// Tear the resource down; must tolerate being called when nothing runs
    async fn stop(&self) -> Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Auxiliary virtual display and remote viewing
#[async_trait]
pub trait DisplaySubsystem: Send + Sync {
    /// Start the subsystem, returning the display identifier (e.g. ":99")
    async fn start(&self) -> Result<String>;

    /// Stop the subsystem; must tolerate being called when nothing runs
    async fn stop(&self) -> Result<()>;
}

/// Owns the lifecycle of the shared execution resource
pub struct ResourceManager {
    launcher: Arc<dyn ResourceLauncher>,
    display: Option<Arc<dyn DisplaySubsystem>>,
    live: Mutex<Option<ResourceHandle>>,
    /// Set while `acquire` is starting parts; left set when the acquire future is dropped
    starting: AtomicBool,
    generation: AtomicU64,
    events: Option<broadcast::Sender<Event>>,
}

impl ResourceManager {
    /// Manager over an explicit launcher and optional display subsystem
    pub fn new(
        launcher: Arc<dyn ResourceLauncher>,
        display: Option<Arc<dyn DisplaySubsystem>>,
    ) -> Self {
        Self {
            launcher,
            display,
            live: Mutex::new(None),
            starting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            events: None,
        }
    }

    /// Manager built from configuration
    ///
    /// A configured `launch` command is run as a long-lived process; otherwise the
    /// resource is just the configured endpoint.
    pub fn from_config(config: &ResourceConfig) -> Self {
        let launcher: Arc<dyn ResourceLauncher> = match &config.launch {
            Some(spec) => Arc::new(ProcessLauncher::new(
                spec.clone(),
                config.endpoint.clone(),
                config.startup_grace,
            )),
            None => Arc::new(EndpointLauncher::new(config.endpoint.clone())),
        };
        let display = config.display.as_ref().map(|d| {
            Arc::new(ProcessDisplay::new(d.clone(), config.startup_grace)) as Arc<dyn DisplaySubsystem>
        });
        Self::new(launcher, display)
    }

    /// Publish acquire/release events on `sender`
    pub fn with_events(mut self, sender: broadcast::Sender<Event>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Return the live handle, starting the resource first when nothing is live
    pub async fn acquire(&self) -> Result<ResourceHandle> {
        let mut live = self.live.lock().await;
        if let Some(handle) = live.as_ref() {
            return Ok(handle.clone());
        }

        self.starting.store(true, Ordering::SeqCst);

        let display = match &self.display {
            Some(subsystem) => match subsystem.start().await {
                Ok(display) => Some(display),
                Err(e) => {
                    self.starting.store(false, Ordering::SeqCst);
                    return Err(as_resource_error(e));
                }
            },
            None => None,
        };

        let endpoint = match self.launcher.start(display.as_deref()).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                if let Some(subsystem) = &self.display {
                    if let Err(stop_err) = subsystem.stop().await {
                        tracing::error!(error = %stop_err, "Failed to stop display after launch failure");
                    }
                }
                self.starting.store(false, Ordering::SeqCst);
                return Err(as_resource_error(e));
            }
        };

        let handle = ResourceHandle {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            endpoint,
            display,
        };
        tracing::info!(
            launcher = self.launcher.name(),
            generation = handle.generation,
            endpoint = ?handle.endpoint,
            display = ?handle.display,
            "Shared resource acquired"
        );
        self.emit(Event::ResourceAcquired {
            endpoint: handle.endpoint.clone(),
        });

        *live = Some(handle.clone());
        self.starting.store(false, Ordering::SeqCst);
        Ok(handle)
    }

    /// Tear down the resource and its display subsystem
    ///
    /// Returns whether anything was live. Both parts are stopped even when the first
    /// one fails; the first failure is returned.
    ///
    /// An acquire that was interrupted mid-start (its future dropped) has no live handle
    /// but may have left the display subsystem running. Those parts are stopped here too,
    /// and the call still returns `false`.
    pub async fn release(&self) -> Result<bool> {
        let mut live = self.live.lock().await;
        let Some(handle) = live.take() else {
            if self.starting.swap(false, Ordering::SeqCst) {
                tracing::warn!("Stopping partially started resource");
                self.stop_parts().await?;
            }
            return Ok(false);
        };

        let result = self.stop_parts().await;

        tracing::info!(generation = handle.generation, "Shared resource released");
        self.emit(Event::ResourceReleased);

        result.map(|()| true)
    }

    async fn stop_parts(&self) -> Result<()> {
        let launcher_result = self.launcher.stop().await;
        let display_result = match &self.display {
            Some(subsystem) => subsystem.stop().await,
            None => Ok(()),
        };

        launcher_result.map_err(as_resource_error)?;
        display_result.map_err(as_resource_error)
    }

    /// Whether a handle is live
    pub async fn is_live(&self) -> bool {
        self.live.lock().await.is_some()
    }

    /// The live handle, without starting anything
    pub async fn current(&self) -> Option<ResourceHandle> {
        self.live.lock().await.clone()
    }

    fn emit(&self, event: Event) {
        if let Some(sender) = &self.events {
            // No subscribers is fine
            let _ = sender.send(event);
        }
    }
}

fn as_resource_error(e: Error) -> Error {
    match e {
        Error::Resource(_) => e,
        other => Error::Resource(other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod testing;
