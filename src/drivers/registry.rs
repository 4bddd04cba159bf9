//! Name-keyed driver table built from configuration

use super::{CommandDriver, Driver};
use crate::config::{DriverConfig, ExtensionsConfig};
use crate::error::{Error, Result};
use crate::types::DriverInfo;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// Builds a driver instance from its name and descriptor
pub type DriverFactory = Arc<dyn Fn(&str, &DriverConfig) -> Result<Arc<dyn Driver>> + Send + Sync>;

/// Statically known driver implementations, keyed by `kind`
#[derive(Clone, Default)]
pub struct DriverCatalog {
    factories: HashMap<String, DriverFactory>,
}

impl DriverCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the implementations shipped in this crate (`command`)
    pub fn with_builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register("command", |name, config| {
            Ok(Arc::new(CommandDriver::from_config(name, config)?) as Arc<dyn Driver>)
        });
        catalog
    }

    /// Register a factory under `kind`, replacing any previous one
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&str, &DriverConfig) -> Result<Arc<dyn Driver>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    fn build(&self, name: &str, config: &DriverConfig) -> Result<Arc<dyn Driver>> {
        let kind = config.kind.as_deref().unwrap_or(name);
        let factory = self.factories.get(kind).ok_or_else(|| {
            Error::config(
                format!("no driver implementation named '{}'", kind),
                format!("extensions.drivers.{}.kind", name),
            )
        })?;
        factory(name, config)
    }
}

/// A driver together with its configured descriptor
pub struct RegisteredDriver {
    /// Driver implementation
    pub driver: Arc<dyn Driver>,
    /// Driver name (without namespace)
    pub name: String,
    /// Fully qualified identifier (`namespace:name`)
    pub id: String,
    /// Payload template loaded from `template_path`
    pub template: Value,
    /// Downstream queue address
    pub queue_address: String,
    /// Effective merge policy (configuration override or the driver's own)
    pub can_merge_batch: bool,
    /// Settings table handed to the driver in each batch context
    pub settings: Map<String, Value>,
    last_report: Mutex<Option<Value>>,
}

impl RegisteredDriver {
    /// Remember the latest report collected from this driver
    pub fn record_report(&self, report: Value) {
        if let Ok(mut last) = self.last_report.lock() {
            *last = Some(report);
        }
    }

    /// Latest report: the driver's own `plugin_return`, or the last collected one
    pub fn last_report(&self) -> Option<Value> {
        self.driver
            .plugin_return()
            .or_else(|| self.last_report.lock().ok().and_then(|r| r.clone()))
    }

    /// Registry listing entry
    pub fn info(&self) -> DriverInfo {
        DriverInfo {
            name: self.name.clone(),
            id: self.id.clone(),
            can_merge_batch: self.can_merge_batch,
            queue_address: self.queue_address.clone(),
            last_report: self.last_report(),
        }
    }
}

impl std::fmt::Debug for RegisteredDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredDriver")
            .field("id", &self.id)
            .field("can_merge_batch", &self.can_merge_batch)
            .field("queue_address", &self.queue_address)
            .finish()
    }
}

/// Immutable view of the registry used for one run
pub type DriverTable = Arc<BTreeMap<String, Arc<RegisteredDriver>>>;

/// Whether a reload request took effect immediately
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReloadOutcome {
    /// The table was rebuilt
    Applied,
    /// A run is in progress; the table is rebuilt when it ends
    Deferred,
}

/// Name-keyed table of driver plugins
///
/// Built once at startup; any driver that fails to initialize is a fatal error. The
/// table is swapped as a whole on [`DriverRegistry::reload`], so readers always see
/// either the old or the new set of drivers.
pub struct DriverRegistry {
    namespace: String,
    extensions: ExtensionsConfig,
    catalog: DriverCatalog,
    table: RwLock<DriverTable>,
}

impl DriverRegistry {
    /// Build the registry from configuration
    pub fn from_config(extensions: &ExtensionsConfig, catalog: DriverCatalog) -> Result<Self> {
        let table = build_table(extensions, &catalog)?;
        if table.is_empty() {
            tracing::warn!(namespace = %extensions.namespace, "No drivers registered");
        } else {
            tracing::info!(
                namespace = %extensions.namespace,
                drivers = ?table.keys().collect::<Vec<_>>(),
                "Driver registry ready"
            );
        }

        Ok(Self {
            namespace: extensions.namespace.clone(),
            extensions: extensions.clone(),
            catalog,
            table: RwLock::new(Arc::new(table)),
        })
    }

    /// Configured namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Fully qualified identifier for a driver name
    pub fn qualify(&self, name: &str) -> String {
        format!("{}:{}", self.namespace, name)
    }

    /// Resolve a driver by name or by `namespace:name`
    pub async fn lookup(&self, name_or_id: &str) -> Result<Arc<RegisteredDriver>> {
        let name = self.local_name(name_or_id)?;
        self.table
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownDriver(name_or_id.to_string()))
    }

    /// Current table
    pub async fn snapshot(&self) -> DriverTable {
        self.table.read().await.clone()
    }

    /// Registry listing ordered by name
    pub async fn list(&self) -> Vec<DriverInfo> {
        self.snapshot().await.values().map(|d| d.info()).collect()
    }

    /// Rebuild the table from the configuration the registry was built with
    ///
    /// Template files are re-read and the configured drivers re-instantiated. The driver
    /// set itself is fixed at startup: adding, removing or re-flagging a driver needs a
    /// restart. On failure the current table stays in place. Callers must ensure no run
    /// is in progress.
    pub async fn reload(&self) -> Result<Vec<String>> {
        let table = build_table(&self.extensions, &self.catalog)?;
        let names: Vec<String> = table.keys().cloned().collect();
        *self.table.write().await = Arc::new(table);
        tracing::info!(drivers = ?names, "Driver registry reloaded");
        Ok(names)
    }

    fn local_name<'a>(&self, name_or_id: &'a str) -> Result<&'a str> {
        match name_or_id.split_once(':') {
            Some((ns, name)) if ns == self.namespace => Ok(name),
            Some(_) => Err(Error::UnknownDriver(name_or_id.to_string())),
            None => Ok(name_or_id),
        }
    }
}

fn build_table(
    extensions: &ExtensionsConfig,
    catalog: &DriverCatalog,
) -> Result<BTreeMap<String, Arc<RegisteredDriver>>> {
    let mut table = BTreeMap::new();

    for (name, descriptor) in &extensions.drivers {
        let key = format!("extensions.drivers.{}", name);
        let driver = catalog.build(name, descriptor).map_err(|e| match e {
            Error::Config { .. } => e,
            other => Error::config(format!("driver '{}' failed to initialize: {}", name, other), &key),
        })?;

        if driver.name() != name {
            return Err(Error::config(
                format!("driver reports name '{}' but is configured as '{}'", driver.name(), name),
                key,
            ));
        }

        driver
            .validate_settings(&descriptor.settings)
            .map_err(|e| Error::config(format!("invalid settings: {}", e), format!("{}.settings", key)))?;

        let template = match &descriptor.template_path {
            Some(path) => load_template(path).map_err(|e| {
                Error::config(e.to_string(), format!("{}.template_path", key))
            })?,
            None => Value::Object(Map::new()),
        };

        let can_merge_batch = descriptor
            .can_merge_batch
            .unwrap_or_else(|| driver.can_merge_batch());

        tracing::debug!(driver = %name, can_merge_batch, "Driver registered");
        table.insert(
            name.clone(),
            Arc::new(RegisteredDriver {
                driver,
                name: name.clone(),
                id: format!("{}:{}", extensions.namespace, name),
                template,
                queue_address: descriptor.queue_address.clone(),
                can_merge_batch,
                settings: descriptor.settings.clone(),
                last_report: Mutex::new(None),
            }),
        );
    }

    Ok(table)
}

/// Load a payload template (TOML when the extension says so, JSON otherwise)
fn load_template(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::Other(format!("failed to read template {}: {}", path.display(), e))
    })?;

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str::<Value>(&raw).map_err(|e| {
            Error::Other(format!("invalid template {}: {}", path.display(), e))
        })
    } else {
        serde_json::from_str(&raw).map_err(|e| {
            Error::Other(format!("invalid template {}: {}", path.display(), e))
        })
    }
}
