//! Driver plugins
//!
//! A driver executes one class of target. The coordinator hands it batches of task
//! records and drives it through a three-phase lifecycle:
//!
//! 1. [`Driver::prepare`] binds the shared execution resource and the batch context
//! 2. [`Driver::handle`] performs the work
//! 3. [`Driver::collect`] reports which identifiers finished
//!
//! Drivers are registered once at startup through the [`DriverRegistry`], which maps the
//! names found in configuration to statically known factories in a [`DriverCatalog`].
//!
//! ## Available Implementations
//!
//! - [`CommandDriver`]: runs an external program per batch and reads its report from stdout

use crate::config::Config;
use crate::db::NewTask;
use crate::error::Result;
use crate::resource::ResourceHandle;
use crate::types::{SubmissionKind, TaskRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod command;
mod registry;

pub use command::CommandDriver;
pub use registry::{
    DriverCatalog, DriverFactory, DriverRegistry, DriverTable, RegisteredDriver, ReloadOutcome,
};

/// What a driver reports after [`Driver::collect`]
///
/// `done_tasks` holds the identifiers (uid or content) that finished; any other keys
/// are driver-specific statistics kept for reporting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginReturn {
    /// Identifiers reported finished
    #[serde(default)]
    pub done_tasks: Vec<String>,

    /// Driver-specific extras
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PluginReturn {
    /// Report listing finished identifiers and nothing else
    pub fn done<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            done_tasks: ids.into_iter().map(Into::into).collect(),
            extra: Map::new(),
        }
    }
}

/// Everything a driver needs to know about the batch it is about to run
#[derive(Clone, Debug)]
pub struct BatchContext {
    /// Identifier of the run this batch belongs to
    pub run_id: String,
    /// Key the payload was published under (the driver name)
    pub queue_key: String,
    /// Address of the broker holding the payload
    pub queue_address: String,
    /// Payload as published
    pub payload: Value,
    /// Records in the batch
    pub records: Vec<TaskRecord>,
    /// Partition key shared by the records
    pub download_dir: Option<String>,
    /// Driver settings from configuration
    pub settings: Map<String, Value>,
}

/// Trait for driver plugins
///
/// Lifecycle methods take `&self`; a driver that keeps state between phases holds it
/// behind interior mutability. Batches are never run concurrently on one driver.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Unique driver name (without namespace)
    fn name(&self) -> &str;

    /// Whether many records may be submitted together
    fn can_merge_batch(&self) -> bool;

    /// Check the driver's settings table at registration time
    fn validate_settings(&self, _settings: &Map<String, Value>) -> Result<()> {
        Ok(())
    }

    /// Structural equality used for deduplication
    fn is_equal(&self, candidate: &NewTask, existing: &TaskRecord, kind: SubmissionKind) -> bool {
        default_equality(candidate, existing, kind)
    }

    /// Serialize records into the payload the driver's execution path expects
    fn build_payload(&self, template: &Value, records: &[TaskRecord]) -> Result<Value> {
        Ok(default_payload(template, records))
    }

    /// Bind the shared resource and batch context
    async fn prepare(
        &self,
        resource: &ResourceHandle,
        batch: &BatchContext,
        config: &Config,
    ) -> Result<()>;

    /// Execute the prepared batch
    async fn handle(&self) -> Result<()>;

    /// Report finished identifiers for the batch just handled
    async fn collect(&self) -> Result<PluginReturn>;

    /// Latest report for observers; a superset of what `collect` returned
    fn plugin_return(&self) -> Option<Value> {
        None
    }
}

/// Equality applied when a driver does not override [`Driver::is_equal`]
///
/// Regular submissions match on content and driver. Special submissions also compare
/// `extra_content`, since the same target may be submitted with different parameters.
pub fn default_equality(candidate: &NewTask, existing: &TaskRecord, kind: SubmissionKind) -> bool {
    let same_target = candidate.content == existing.content && candidate.driver == existing.driver;
    match kind {
        SubmissionKind::Regular => same_target,
        SubmissionKind::Special => same_target && candidate.extra_content == existing.extra_content,
    }
}

/// Payload built when a driver does not override [`Driver::build_payload`]
///
/// The template's keys are kept and a `tasks` array describing the records is added.
/// A non-object template is wrapped under `template`.
pub fn default_payload(template: &Value, records: &[TaskRecord]) -> Value {
    let mut payload = match template {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("template".into(), other.clone());
            map
        }
    };

    let tasks = records
        .iter()
        .map(|r| {
            serde_json::json!({
                "uid": r.uid,
                "content": r.content,
                "driver": r.driver,
                "download_dir": r.download_dir,
                "extra_content": r.extra_content,
            })
        })
        .collect();

    payload.insert("tasks".into(), Value::Array(tasks));
    if let Some(dir) = records.first().and_then(|r| r.download_dir.clone()) {
        payload.insert("download_dir".into(), Value::String(dir));
    }
    Value::Object(payload)
}

#[cfg(test)]
pub(crate) mod testing;
