//! The dispatcher facade wiring every component together
//!
//! The `Dispatcher` struct and its methods are organized by domain:
//! - [`intake`] - Submission front ends and the deduplicating `create`
//! - [`lookup`] - Record and driver queries
//! - [`runs`] - Run triggering, cancellation, periodic runs, resource and reload control
//! - [`lifecycle`] - Graceful shutdown

mod intake;
mod lifecycle;
mod lookup;
mod runs;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use crate::bridge::{QueueBridge, RedisQueueBridge};
use crate::config::Config;
use crate::coordinator::ExecutionCoordinator;
use crate::db::Database;
use crate::dedup::Deduplicator;
use crate::drivers::{DriverCatalog, DriverRegistry};
use crate::error::{Error, Result};
use crate::resource::ResourceManager;
use crate::types::Event;
use regex::Regex;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// A compiled URL routing rule
#[derive(Clone, Debug)]
pub(crate) struct Route {
    pattern: Regex,
    driver: String,
}

/// Main dispatcher instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Dispatcher {
    /// Task store, public for integration tests and embedding applications
    pub db: Arc<Database>,
    pub(crate) config: Arc<Config>,
    pub(crate) registry: Arc<DriverRegistry>,
    pub(crate) resource: Arc<ResourceManager>,
    pub(crate) coordinator: Arc<ExecutionCoordinator>,
    pub(crate) dedup: Deduplicator,
    pub(crate) routes: Arc<Vec<Route>>,
    /// Serializes the dedup check and insert of concurrent submissions
    pub(crate) intake_lock: Arc<tokio::sync::Mutex<()>>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Cleared during shutdown; submissions and runs are refused afterwards
    pub(crate) accepting: Arc<AtomicBool>,
    /// Cancelled during shutdown to stop background loops
    pub(crate) shutdown_token: CancellationToken,
}

impl Dispatcher {
    /// Build a dispatcher with the built-in drivers, a Redis queue bridge and the
    /// configured resource
    pub async fn new(config: Config) -> Result<Self> {
        DispatcherBuilder::new(config).build().await
    }

    /// Start configuring a dispatcher
    pub fn builder(config: Config) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    /// Configuration the dispatcher was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Driver registry
    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Subscribe to dispatcher events
    ///
    /// Slow subscribers lose the oldest events (`RecvError::Lagged`).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }
}

/// Builder for [`Dispatcher`]
///
/// Everything but the configuration is optional: the catalog defaults to the built-in
/// drivers, the bridge to Redis and the resource manager to the configured resource.
pub struct DispatcherBuilder {
    config: Config,
    catalog: DriverCatalog,
    bridge: Option<Arc<dyn QueueBridge>>,
    resource: Option<ResourceManager>,
}

impl DispatcherBuilder {
    /// Builder over `config`
    pub fn new(config: Config) -> Self {
        Self {
            config,
            catalog: DriverCatalog::with_builtin(),
            bridge: None,
            resource: None,
        }
    }

    /// Driver implementations available to the registry
    pub fn catalog(mut self, catalog: DriverCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Queue bridge used to publish batch payloads
    pub fn bridge(mut self, bridge: Arc<dyn QueueBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Resource manager replacing the configured resource
    pub fn resource(mut self, resource: ResourceManager) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Validate the configuration, open the store and register every driver
    ///
    /// Any driver that fails to initialize makes the whole build fail.
    pub async fn build(self) -> Result<Dispatcher> {
        let DispatcherBuilder {
            config,
            catalog,
            bridge,
            resource,
        } = self;

        config.validate()?;

        let routes = config
            .routing
            .iter()
            .enumerate()
            .map(|(idx, rule)| {
                Regex::new(&rule.pattern)
                    .map(|pattern| Route {
                        pattern,
                        driver: rule.driver.clone(),
                    })
                    .map_err(|e| {
                        Error::config(
                            format!("invalid pattern '{}': {}", rule.pattern, e),
                            format!("routing[{}]", idx),
                        )
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let registry = Arc::new(DriverRegistry::from_config(&config.extensions, catalog)?);
        let db = Arc::new(Database::new(&config.persistence.database_path).await?);

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let resource = Arc::new(
            resource
                .unwrap_or_else(|| ResourceManager::from_config(&config.resource))
                .with_events(event_tx.clone()),
        );
        let bridge =
            bridge.unwrap_or_else(|| Arc::new(RedisQueueBridge::new()) as Arc<dyn QueueBridge>);
        let config = Arc::new(config);

        let coordinator = Arc::new(ExecutionCoordinator::new(
            config.clone(),
            db.clone(),
            registry.clone(),
            resource.clone(),
            bridge,
            event_tx.clone(),
        ));
        let dedup = Deduplicator::new(db.clone(), config.retry.clone());

        tracing::info!(
            namespace = %registry.namespace(),
            routes = routes.len(),
            reconcile = ?config.execution.reconcile,
            "Dispatcher ready"
        );

        Ok(Dispatcher {
            db,
            config,
            registry,
            resource,
            coordinator,
            dedup,
            routes: Arc::new(routes),
            intake_lock: Arc::new(tokio::sync::Mutex::new(())),
            event_tx,
            accepting: Arc::new(AtomicBool::new(true)),
            shutdown_token: CancellationToken::new(),
        })
    }
}
