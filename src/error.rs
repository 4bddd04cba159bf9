//! Error types for batch-dispatch
//!
//! This module provides the error taxonomy shared by every component:
//! - Startup/configuration failures (fatal, the dispatcher never becomes ready)
//! - Intake rejections (duplicates, unknown drivers)
//! - Store failures, classified as transient or permanent for the retry helper
//! - Driver lifecycle and shared-resource failures that end a run
//! - HTTP status code mapping and structured JSON bodies for the REST API

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for batch-dispatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for batch-dispatch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "extensions.namespace")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A submission was rejected by the deduplicator
    #[error("duplicate task: {0}")]
    Duplicate(String),

    /// A driver identifier could not be resolved in the registry
    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    /// A driver lifecycle phase reported failure
    #[error("driver error: {0}")]
    Plugin(#[from] PluginError),

    /// The shared execution resource or its auxiliary subsystem failed
    #[error("resource error: {0}")]
    Resource(String),

    /// Publishing a batch payload to the downstream queue failed
    #[error("queue bridge error: {0}")]
    QueueBridge(String),

    /// Redis client error
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Task or other record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// A run is in progress and the operation needs the run lock
    #[error("busy: {0}")]
    Busy(String),

    /// The in-flight run was cancelled
    #[error("run cancelled")]
    Cancelled,

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new work")]
    ShuttingDown,

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// The database is locked or busy; the operation may succeed if retried
    #[error("database busy: {0}")]
    Busy(String),
}

impl DatabaseError {
    /// Classify a sqlx failure raised while running `context`.
    ///
    /// Connection-level and lock contention failures become [`DatabaseError::Busy`]
    /// so the retry helper treats them as transient.
    pub fn from_sqlx(context: &str, e: sqlx::Error) -> Self {
        let message = format!("{}: {}", context, e);
        match &e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => DatabaseError::Busy(message),
            sqlx::Error::Database(db) if is_lock_contention(db.message()) => {
                DatabaseError::Busy(message)
            }
            _ => DatabaseError::QueryFailed(message),
        }
    }
}

fn is_lock_contention(message: &str) -> bool {
    message.contains("database is locked") || message.contains("database table is locked")
}

/// Lifecycle phase of a driver invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Payload serialization
    Payload,
    /// Resource binding before execution
    Prepare,
    /// Actual execution
    Handle,
    /// Result collection
    Collect,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Payload => "payload",
            Phase::Prepare => "prepare",
            Phase::Handle => "handle",
            Phase::Collect => "collect",
        };
        f.write_str(name)
    }
}

/// Failure reported by a driver during one of its lifecycle phases
#[derive(Debug, Error)]
#[error("driver {driver} failed during {phase}: {message}")]
pub struct PluginError {
    /// Registered driver name
    pub driver: String,
    /// Phase that failed
    pub phase: Phase,
    /// Message returned by the driver
    pub message: String,
}

impl PluginError {
    /// Create a new plugin error
    pub fn new(driver: impl Into<String>, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            phase,
            message: message.into(),
        }
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "duplicate",
///     "message": "duplicate task: https://example.com already exists for ns:pages",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "duplicate")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,
            Error::UnknownDriver(_) => 422,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 409 Conflict
            Error::Duplicate(_) => 409,
            Error::Busy(_) => 409,
            Error::Cancelled => 409,

            // 500 Internal Server Error
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - downstream collaborators
            Error::Plugin(_) => 502,
            Error::QueueBridge(_) => 502,
            Error::Redis(_) => 502,

            // 503 Service Unavailable
            Error::Resource(_) => 503,
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Duplicate(_) => "duplicate",
            Error::UnknownDriver(_) => "unknown_driver",
            Error::Plugin(_) => "plugin_error",
            Error::Resource(_) => "resource_error",
            Error::QueueBridge(_) | Error::Redis(_) => "queue_bridge_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::NotFound(_) => "not_found",
            Error::Busy(_) => "busy",
            Error::Cancelled => "cancelled",
            Error::ShuttingDown => "shutting_down",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Plugin(e) => Some(serde_json::json!({
                "driver": e.driver,
                "phase": e.phase,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
