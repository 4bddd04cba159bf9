//! Shared test helpers for creating Dispatcher instances in tests.

use crate::bridge::MemoryQueueBridge;
use crate::config::{Config, DriverConfig, RouteRule};
use crate::dispatcher::Dispatcher;
use crate::drivers::testing::ScriptedDriver;
use crate::drivers::{Driver, DriverCatalog};
use crate::resource::ResourceManager;
use crate::resource::testing::CountingLauncher;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// A dispatcher wired to in-memory collaborators
pub(crate) struct TestDispatcher {
    pub dispatcher: Dispatcher,
    pub bridge: Arc<MemoryQueueBridge>,
    pub launcher: Arc<CountingLauncher>,
    pub drivers: HashMap<String, Arc<ScriptedDriver>>,
    pub _temp_dir: tempfile::TempDir,
}

/// Drivers `pages` (mergeable) and `video` (single record), routed by URL:
/// everything on example.com goes to `pages`, `/watch` URLs also go to `video`.
pub(crate) async fn create_test_dispatcher() -> TestDispatcher {
    create_dispatcher_with(
        vec![
            ScriptedDriver::new("pages", true),
            ScriptedDriver::new("video", false),
        ],
        vec![
            route(r"^https?://example\.com/", "pages"),
            route(r"/watch", "video"),
        ],
    )
    .await
}

pub(crate) fn route(pattern: &str, driver: &str) -> RouteRule {
    RouteRule {
        pattern: pattern.into(),
        driver: driver.into(),
    }
}

pub(crate) async fn create_dispatcher_with(
    drivers: Vec<ScriptedDriver>,
    routing: Vec<RouteRule>,
) -> TestDispatcher {
    let temp_dir = tempdir().unwrap();

    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");
    config.extensions.namespace = "collect".into();
    config.routing = routing;
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(1);

    let mut catalog = DriverCatalog::new();
    let mut table = HashMap::new();
    for driver in drivers {
        let name = driver.name().to_string();
        let driver = Arc::new(driver);
        table.insert(name.clone(), driver.clone());
        catalog.register(name.clone(), move |_, _| Ok(driver.clone() as Arc<dyn Driver>));
        config.extensions.drivers.insert(
            name.clone(),
            DriverConfig::new(format!("redis://127.0.0.1:6379/{}", table.len())),
        );
    }

    let bridge = Arc::new(MemoryQueueBridge::new());
    let launcher = Arc::new(CountingLauncher::default());

    let dispatcher = Dispatcher::builder(config)
        .catalog(catalog)
        .bridge(bridge.clone())
        .resource(ResourceManager::new(launcher.clone(), None))
        .build()
        .await
        .unwrap();

    TestDispatcher {
        dispatcher,
        bridge,
        launcher,
        drivers: table,
        _temp_dir: temp_dir,
    }
}
