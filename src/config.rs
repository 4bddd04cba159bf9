//! Configuration types for batch-dispatch
//!
//! The configuration is immutable once the dispatcher is built. Every section has serde
//! defaults so a minimal file only needs the `[extensions]` table:
//!
//! ```toml
//! [extensions]
//! namespace = "collect"
//!
//! [extensions.drivers.pages]
//! template_path = "templates/pages.json"
//! queue_address = "redis://127.0.0.1:6379/1"
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, net::SocketAddr, path::Path, path::PathBuf, time::Duration};

/// Main configuration for the dispatcher
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Driver namespace and per-driver descriptors
    #[serde(default)]
    pub extensions: ExtensionsConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Retry policy for store operations
    #[serde(default)]
    pub retry: RetryConfig,

    /// Run behaviour (reconciliation, periodic trigger, payload TTL)
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Shared execution resource and its display forwarding
    #[serde(default)]
    pub resource: ResourceConfig,

    /// URL routing rules used by single and bulk submissions
    #[serde(default)]
    pub routing: Vec<RouteRule>,

    /// REST API server
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Load and validate a configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config = Self::from_toml(&raw)?;
        tracing::info!(
            path = %path.display(),
            namespace = %config.extensions.namespace,
            drivers = config.extensions.drivers.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate a configuration from TOML text
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw).map_err(|e| Error::Config {
            message: format!("invalid configuration: {}", e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let ns = &self.extensions.namespace;
        if ns.trim().is_empty() {
            return Err(Error::config(
                "namespace must not be empty",
                "extensions.namespace",
            ));
        }
        if ns.contains(':') {
            return Err(Error::config(
                format!("namespace '{}' must not contain ':'", ns),
                "extensions.namespace",
            ));
        }

        for (name, driver) in &self.extensions.drivers {
            let key = format!("extensions.drivers.{}", name);
            if name.trim().is_empty() || name.contains(':') {
                return Err(Error::config(
                    format!("invalid driver name '{}'", name),
                    key,
                ));
            }
            if driver.queue_address.trim().is_empty() {
                return Err(Error::config(
                    "queue_address must not be empty",
                    format!("{}.queue_address", key),
                ));
            }
        }

        for (idx, rule) in self.routing.iter().enumerate() {
            let key = format!("routing[{}]", idx);
            regex::Regex::new(&rule.pattern).map_err(|e| {
                Error::config(format!("invalid pattern '{}': {}", rule.pattern, e), &key)
            })?;
            if !self.extensions.drivers.contains_key(&rule.driver) {
                return Err(Error::config(
                    format!("route targets unconfigured driver '{}'", rule.driver),
                    key,
                ));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "max_attempts must be at least 1",
                "retry.max_attempts",
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !(multiplier.is_finite() && multiplier >= 1.0) {
            return Err(Error::config(
                format!("backoff_multiplier must be a finite number >= 1.0, got {}", multiplier),
                "retry.backoff_multiplier",
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(Error::config(
                "initial_delay must not exceed max_delay",
                "retry.initial_delay",
            ));
        }

        Ok(())
    }

    /// Fully qualified driver identifier (`namespace:name`)
    pub fn driver_id(&self, name: &str) -> String {
        format!("{}:{}", self.extensions.namespace, name)
    }
}

/// Driver namespace and descriptors
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtensionsConfig {
    /// Prefix every schedulable driver identifier must carry (default: "batch")
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Driver descriptors keyed by driver name
    #[serde(default)]
    pub drivers: BTreeMap<String, DriverConfig>,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            drivers: BTreeMap::new(),
        }
    }
}

/// Descriptor for one registered driver
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Factory used to build the driver (defaults to the driver name)
    #[serde(default)]
    pub kind: Option<String>,

    /// Payload template file (JSON or TOML); an empty object when absent
    #[serde(default)]
    pub template_path: Option<PathBuf>,

    /// Downstream key/value broker address (e.g. "redis://127.0.0.1:6379/1")
    pub queue_address: String,

    /// Override for the driver's own merge capability
    #[serde(default)]
    pub can_merge_batch: Option<bool>,

    /// Free-form settings handed to the driver factory
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl DriverConfig {
    /// Descriptor pointing at a queue address with no template or settings
    pub fn new(queue_address: impl Into<String>) -> Self {
        Self {
            kind: None,
            template_path: None,
            queue_address: queue_address.into(),
            can_merge_batch: None,
            settings: serde_json::Map::new(),
        }
    }
}

/// Persistence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./batch-dispatch.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Retry configuration for transient store failures
///
/// The defaults reproduce a fixed backoff: five attempts two seconds apart.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts including the first one (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 2 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each retry (default: 1.0, fixed backoff)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// When completion status is written back to the store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Commit each batch's completions right after its `collect()` (default)
    #[default]
    PerBatch,
    /// Commit all completions once, after every batch of the run succeeded
    EndOfRun,
}

/// Run behaviour
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Reconciliation policy
    #[serde(default)]
    pub reconcile: ReconcileMode,

    /// Trigger a run periodically (None = only on demand)
    #[serde(default, with = "optional_duration_serde")]
    pub run_interval: Option<Duration>,

    /// Expiry applied to published batch payloads (None = no expiry)
    #[serde(default, with = "optional_duration_serde")]
    pub payload_ttl: Option<Duration>,
}

/// External program invocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,

    /// Arguments (may contain `{display}`, `{vnc_port}`, `{novnc_port}` placeholders)
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    /// Command with arguments and no extra environment
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }
}

/// Shared execution resource configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Long-running process backing the resource (None = in-process handle only)
    #[serde(default)]
    pub launch: Option<CommandSpec>,

    /// Endpoint drivers should connect to (e.g. a remote automation URL)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Virtual display and remote viewing, started before the resource
    #[serde(default)]
    pub display: Option<DisplayConfig>,

    /// Time allowed for a launched process to come up before it is checked (default: 1s)
    #[serde(default = "default_startup_grace", with = "duration_serde_millis")]
    pub startup_grace: Duration,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            launch: None,
            endpoint: None,
            display: None,
            startup_grace: default_startup_grace(),
        }
    }
}

/// Virtual display and forwarding processes
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// X display number (default: 99)
    #[serde(default = "default_display_number")]
    pub display_number: u32,

    /// VNC port the display is exported on (default: 5911)
    #[serde(default = "default_vnc_port")]
    pub vnc_port: u16,

    /// Web viewer port forwarding the VNC port (default: 9101)
    #[serde(default = "default_novnc_port")]
    pub novnc_port: u16,

    /// Processes started in order and stopped in reverse order
    #[serde(default = "default_display_processes")]
    pub processes: Vec<CommandSpec>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            display_number: default_display_number(),
            vnc_port: default_vnc_port(),
            novnc_port: default_novnc_port(),
            processes: default_display_processes(),
        }
    }
}

/// Maps submitted URLs to drivers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteRule {
    /// Regular expression matched against the submitted URL
    pub pattern: String,

    /// Driver name (without namespace) receiving matching URLs
    pub driver: String,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:8081)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

fn default_namespace() -> String {
    "batch".into()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("batch-dispatch.db")
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_startup_grace() -> Duration {
    Duration::from_secs(1)
}

fn default_display_number() -> u32 {
    99
}

fn default_vnc_port() -> u16 {
    5911
}

fn default_novnc_port() -> u16 {
    9101
}

fn default_display_processes() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("Xvfb", &[":{display}", "-screen", "0", "1920x1080x24"]),
        CommandSpec::new(
            "x11vnc",
            &[
                "-display",
                ":{display}",
                "-forever",
                "-shared",
                "-nopw",
                "-rfbport",
                "{vnc_port}",
            ],
        ),
        CommandSpec::new(
            "websockify",
            &["--web=/usr/share/novnc", "{novnc_port}", "localhost:{vnc_port}"],
        ),
    ]
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_serde_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
