//! Driver adapter running an external program per batch

use super::{BatchContext, Driver, PluginReturn};
use crate::config::{Config, DriverConfig};
use crate::error::{Error, Phase, PluginError, Result};
use crate::resource::ResourceHandle;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Settings table accepted by [`CommandDriver`]
#[derive(Clone, Debug, Deserialize)]
struct CommandSettings {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default = "default_merge")]
    can_merge_batch: bool,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

fn default_merge() -> bool {
    true
}

#[derive(Debug)]
struct Prepared {
    binary: PathBuf,
    batch: BatchContext,
    endpoint: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    prepared: Option<Prepared>,
    stdout: Option<String>,
    last_report: Option<Value>,
}

/// Runs a configured program for each batch
///
/// The program receives the batch payload as JSON on stdin and these environment
/// variables:
///
/// - `BATCH_DISPATCH_RUN_ID`
/// - `BATCH_DISPATCH_QUEUE_KEY` and `BATCH_DISPATCH_QUEUE_ADDRESS` (where the payload was published)
/// - `BATCH_DISPATCH_RESOURCE_ENDPOINT` (when the shared resource exposes one)
///
/// It must exit successfully and print a JSON object with a `done_tasks` array on stdout.
///
/// ```toml
/// [extensions.drivers.pages]
/// kind = "command"
/// queue_address = "redis://127.0.0.1:6379/1"
///
/// [extensions.drivers.pages.settings]
/// program = "collect-pages"
/// args = ["--headless"]
/// can_merge_batch = true
/// ```
pub struct CommandDriver {
    name: String,
    settings: CommandSettings,
    state: Mutex<State>,
}

impl CommandDriver {
    /// Build from a driver descriptor's settings table
    pub fn from_config(name: &str, config: &DriverConfig) -> Result<Self> {
        let settings: CommandSettings =
            serde_json::from_value(Value::Object(config.settings.clone())).map_err(|e| {
                Error::config(
                    format!("invalid command driver settings: {}", e),
                    format!("extensions.drivers.{}.settings", name),
                )
            })?;

        Ok(Self {
            name: name.to_string(),
            settings,
            state: Mutex::new(State::default()),
        })
    }

    fn fail(&self, phase: Phase, message: impl Into<String>) -> Error {
        Error::Plugin(PluginError::new(&self.name, phase, message))
    }

    fn with_state<T>(&self, phase: Phase, f: impl FnOnce(&mut State) -> T) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| self.fail(phase, "driver state poisoned"))?;
        Ok(f(&mut state))
    }

    fn resolve_binary(&self) -> Result<PathBuf> {
        let program = PathBuf::from(&self.settings.program);
        if program.components().count() > 1 {
            if program.is_file() {
                return Ok(program);
            }
            return Err(self.fail(
                Phase::Prepare,
                format!("program not found: {}", program.display()),
            ));
        }
        which::which(&self.settings.program).map_err(|e| {
            self.fail(
                Phase::Prepare,
                format!("program '{}' not found in PATH: {}", self.settings.program, e),
            )
        })
    }
}

#[async_trait]
impl Driver for CommandDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_merge_batch(&self) -> bool {
        self.settings.can_merge_batch
    }

    async fn prepare(
        &self,
        resource: &ResourceHandle,
        batch: &BatchContext,
        _config: &Config,
    ) -> Result<()> {
        let binary = self.resolve_binary()?;
        tracing::debug!(driver = %self.name, binary = %binary.display(), "Command driver prepared");

        self.with_state(Phase::Prepare, |state| {
            state.prepared = Some(Prepared {
                binary,
                batch: batch.clone(),
                endpoint: resource.endpoint().map(str::to_string),
            });
            state.stdout = None;
        })
    }

    async fn handle(&self) -> Result<()> {
        let prepared = self
            .with_state(Phase::Handle, |state| state.prepared.take())?
            .ok_or_else(|| self.fail(Phase::Handle, "handle called before prepare"))?;

        let mut command = Command::new(&prepared.binary);
        command
            .args(&self.settings.args)
            .env("BATCH_DISPATCH_RUN_ID", &prepared.batch.run_id)
            .env("BATCH_DISPATCH_QUEUE_KEY", &prepared.batch.queue_key)
            .env("BATCH_DISPATCH_QUEUE_ADDRESS", &prepared.batch.queue_address)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(endpoint) = &prepared.endpoint {
            command.env("BATCH_DISPATCH_RESOURCE_ENDPOINT", endpoint);
        }

        let mut child = command
            .spawn()
            .map_err(|e| self.fail(Phase::Handle, format!("failed to start: {}", e)))?;

        let payload = serde_json::to_vec(&prepared.batch.payload)?;
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                // The program may exit without reading its input
                let _ = stdin.write_all(&payload).await;
            });
        }

        let wait = child.wait_with_output();
        let output = match self.settings.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), wait)
                .await
                .map_err(|_| self.fail(Phase::Handle, format!("timed out after {}s", secs)))?,
            None => wait.await,
        }
        .map_err(|e| self.fail(Phase::Handle, format!("failed to wait: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.fail(
                Phase::Handle,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        self.with_state(Phase::Handle, |state| state.stdout = Some(stdout))
    }

    async fn collect(&self) -> Result<PluginReturn> {
        let stdout = self
            .with_state(Phase::Collect, |state| state.stdout.take())?
            .ok_or_else(|| self.fail(Phase::Collect, "collect called before handle"))?;

        let report = parse_report(&stdout)
            .ok_or_else(|| self.fail(Phase::Collect, "no JSON report with done_tasks on stdout"))?;
        let value = serde_json::to_value(&report)?;
        self.with_state(Phase::Collect, |state| state.last_report = Some(value))?;
        Ok(report)
    }

    fn plugin_return(&self) -> Option<Value> {
        self.state.lock().ok().and_then(|s| s.last_report.clone())
    }
}

/// The whole output as one JSON object, or else the last line that is one
fn parse_report(stdout: &str) -> Option<PluginReturn> {
    let parse = |s: &str| -> Option<PluginReturn> {
        match serde_json::from_str::<Value>(s.trim()).ok()? {
            Value::Object(map) if map.contains_key("done_tasks") => {
                serde_json::from_value(Value::Object(map)).ok()
            }
            _ => None,
        }
    };

    parse(stdout).or_else(|| {
        stdout
            .lines()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .find_map(parse)
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskId, TaskRecord, TaskStatus};

    fn driver(script: &str) -> CommandDriver {
        let mut config = DriverConfig::new("redis://127.0.0.1:6379/1");
        config.settings.insert("program".into(), "sh".into());
        config
            .settings
            .insert("args".into(), serde_json::json!(["-c", script]));
        CommandDriver::from_config("pages", &config).unwrap()
    }

    fn batch() -> BatchContext {
        let record = TaskRecord {
            id: TaskId(1),
            uid: Some("u1".into()),
            content: "https://example.com/1".into(),
            status: TaskStatus::Pending,
            driver: "ns:pages".into(),
            download_dir: None,
            extra_content: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        BatchContext {
            run_id: "run-1".into(),
            queue_key: "pages".into(),
            queue_address: "redis://127.0.0.1:6379/1".into(),
            payload: serde_json::json!({"tasks": [{"uid": "u1"}]}),
            records: vec![record],
            download_dir: None,
            settings: Default::default(),
        }
    }

    #[test]
    fn parse_report_accepts_whole_output_or_last_line() {
        let report = parse_report(r#"{"done_tasks": ["a", "b"], "pages": 2}"#).unwrap();
        assert_eq!(report.done_tasks, vec!["a", "b"]);
        assert_eq!(report.extra["pages"], 2);

        let report = parse_report("starting\nworking\n{\"done_tasks\": [\"c\"]}\n").unwrap();
        assert_eq!(report.done_tasks, vec!["c"]);

        assert!(parse_report("no report here").is_none());
        assert!(parse_report(r#"{"other": 1}"#).is_none());
    }

    #[test]
    fn settings_require_program() {
        let config = DriverConfig::new("redis://localhost");
        let err = CommandDriver::from_config("pages", &config).err().unwrap();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn runs_program_and_collects_report() {
        let driver = driver(
            r#"payload=$(cat); case "$payload" in *u1*) echo "{\"done_tasks\":[\"$BATCH_DISPATCH_QUEUE_KEY\",\"u1\"]}";; esac"#,
        );
        let config = Config::default();

        driver
            .prepare(&ResourceHandle::detached(), &batch(), &config)
            .await
            .unwrap();
        driver.handle().await.unwrap();
        let report = driver.collect().await.unwrap();

        assert_eq!(report.done_tasks, vec!["pages", "u1"]);
        assert_eq!(driver.plugin_return().unwrap()["done_tasks"][1], "u1");
    }

    #[tokio::test]
    async fn failing_program_is_a_handle_error() {
        let driver = driver("echo boom >&2; exit 3");

        driver
            .prepare(&ResourceHandle::detached(), &batch(), &Config::default())
            .await
            .unwrap();
        let err = driver.handle().await.unwrap_err();

        match err {
            Error::Plugin(e) => {
                assert_eq!(e.phase, Phase::Handle);
                assert!(e.message.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_fails_prepare() {
        let mut config = DriverConfig::new("redis://localhost");
        config
            .settings
            .insert("program".into(), "nonexistent-batch-driver-xyz".into());
        let driver = CommandDriver::from_config("pages", &config).unwrap();

        let err = driver
            .prepare(&ResourceHandle::detached(), &batch(), &Config::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Plugin(ref e) if e.phase == Phase::Prepare));
    }

    #[tokio::test]
    async fn handle_without_prepare_is_rejected() {
        let driver = driver("true");
        assert!(driver.handle().await.is_err());
    }
}
