//! Process-backed resource launcher and display subsystem

use super::{DisplaySubsystem, ResourceLauncher};
use crate::config::{CommandSpec, DisplayConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// A long-running child process
#[derive(Debug)]
pub struct ManagedProcess {
    program: String,
    child: Child,
}

impl ManagedProcess {
    /// Spawn `spec` with `{name}` placeholders in its arguments replaced from `vars`
    ///
    /// The process is given `grace` to come up; exiting within that window is a failure.
    pub async fn spawn(
        spec: &CommandSpec,
        vars: &HashMap<&str, String>,
        extra_env: &[(&str, String)],
        grace: Duration,
    ) -> Result<Self> {
        let binary = resolve(&spec.program)?;
        let args: Vec<String> = spec.args.iter().map(|a| substitute(a, vars)).collect();

        let mut command = Command::new(&binary);
        command
            .args(&args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in extra_env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::Resource(format!("failed to start {}: {}", spec.program, e))
        })?;

        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }
        if let Some(status) = child.try_wait()? {
            return Err(Error::Resource(format!(
                "{} exited during startup with {}",
                spec.program, status
            )));
        }

        tracing::info!(program = %spec.program, pid = child.id(), args = ?args, "Process started");
        Ok(Self {
            program: spec.program.clone(),
            child,
        })
    }

    /// Kill the process and reap it
    pub async fn stop(mut self) -> Result<()> {
        if self.child.try_wait()?.is_none() {
            self.child.kill().await.map_err(|e| {
                Error::Resource(format!("failed to stop {}: {}", self.program, e))
            })?;
        }
        tracing::info!(program = %self.program, "Process stopped");
        Ok(())
    }
}

fn resolve(program: &str) -> Result<PathBuf> {
    let path = PathBuf::from(program);
    if path.components().count() > 1 {
        return Ok(path);
    }
    which::which(program)
        .map_err(|e| Error::Resource(format!("{} not found in PATH: {}", program, e)))
}

fn substitute(arg: &str, vars: &HashMap<&str, String>) -> String {
    vars.iter().fold(arg.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{}}}", name), value)
    })
}

/// Resource with nothing to start: only a configured endpoint
#[derive(Debug, Default)]
pub struct EndpointLauncher {
    endpoint: Option<String>,
}

impl EndpointLauncher {
    /// Launcher reporting `endpoint`
    pub fn new(endpoint: Option<String>) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl ResourceLauncher for EndpointLauncher {
    async fn start(&self, _display: Option<&str>) -> Result<Option<String>> {
        Ok(self.endpoint.clone())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "endpoint"
    }
}

/// Runs the resource as a child process
pub struct ProcessLauncher {
    spec: CommandSpec,
    endpoint: Option<String>,
    grace: Duration,
    process: Mutex<Option<ManagedProcess>>,
}

impl ProcessLauncher {
    /// Launcher for `spec`, reporting `endpoint` once started
    pub fn new(spec: CommandSpec, endpoint: Option<String>, grace: Duration) -> Self {
        Self {
            spec,
            endpoint,
            grace,
            process: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ResourceLauncher for ProcessLauncher {
    async fn start(&self, display: Option<&str>) -> Result<Option<String>> {
        let mut process = self.process.lock().await;
        if process.is_none() {
            let mut vars = HashMap::new();
            let mut env = Vec::new();
            if let Some(display) = display {
                vars.insert("display", display.to_string());
                env.push(("DISPLAY", display.to_string()));
            }
            *process = Some(ManagedProcess::spawn(&self.spec, &vars, &env, self.grace).await?);
        }
        Ok(self.endpoint.clone())
    }

    async fn stop(&self) -> Result<()> {
        match self.process.lock().await.take() {
            Some(process) => process.stop().await,
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// Virtual display plus VNC and web forwarding, as configured child processes
///
/// Processes start in order and stop in reverse order. Arguments may use `{display}`,
/// `{vnc_port}` and `{novnc_port}`.
pub struct ProcessDisplay {
    config: DisplayConfig,
    grace: Duration,
    processes: Mutex<Vec<ManagedProcess>>,
}

impl ProcessDisplay {
    /// Display subsystem for `config`
    pub fn new(config: DisplayConfig, grace: Duration) -> Self {
        Self {
            config,
            grace,
            processes: Mutex::new(Vec::new()),
        }
    }

    fn display(&self) -> String {
        format!(":{}", self.config.display_number)
    }

    fn vars(&self) -> HashMap<&'static str, String> {
        HashMap::from([
            ("display", self.config.display_number.to_string()),
            ("vnc_port", self.config.vnc_port.to_string()),
            ("novnc_port", self.config.novnc_port.to_string()),
        ])
    }
}

#[async_trait]
impl DisplaySubsystem for ProcessDisplay {
    async fn start(&self) -> Result<String> {
        let mut processes = self.processes.lock().await;
        if !processes.is_empty() {
            return Ok(self.display());
        }

        let vars = self.vars();
        let env = [("DISPLAY", self.display())];
        for spec in &self.config.processes {
            match ManagedProcess::spawn(spec, &vars, &env, self.grace).await {
                Ok(process) => processes.push(process),
                Err(e) => {
                    while let Some(started) = processes.pop() {
                        if let Err(stop_err) = started.stop().await {
                            tracing::error!(error = %stop_err, "Failed to stop display process");
                        }
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(
            display = %self.display(),
            vnc_port = self.config.vnc_port,
            novnc_port = self.config.novnc_port,
            "Display subsystem started"
        );
        Ok(self.display())
    }

    async fn stop(&self) -> Result<()> {
        let mut processes = self.processes.lock().await;
        let mut first_error = None;
        while let Some(process) = processes.pop() {
            if let Err(e) = process.stop().await {
                tracing::error!(error = %e, "Failed to stop display process");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
