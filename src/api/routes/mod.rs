//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`tasks`] - Submissions, lookups and run triggering
//! - [`drivers`] - Driver listing and reload
//! - [`system`] - Health, events, OpenAPI, resource control, run cancellation

use serde::{Deserialize, Serialize};

mod drivers;
mod system;
mod tasks;

// Re-export all handlers so `routes::function_name` works from the router
pub use drivers::*;
pub use system::*;
pub use tasks::*;

// ============================================================================
// Query/Request Types (shared across handlers)
// ============================================================================

/// Request body for POST /tasks/single
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct SingleTaskRequest {
    /// URL routed to every driver whose rule matches
    pub url: String,
}

/// Request body for POST /tasks/single/special
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct SpecialTaskRequest {
    /// Target URL
    pub url: String,
    /// Driver name, with or without the namespace prefix
    pub driver: String,
    /// Opaque payload compared during deduplication
    #[serde(default)]
    pub extra_content: Option<String>,
    /// Destination partition key
    #[serde(default)]
    pub download_dir: Option<String>,
}

/// Request body for POST /tasks/bulk
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct BulkTasksRequest {
    /// URLs to route and store
    pub urls: Vec<String>,
    /// Destination partition key shared by every accepted record
    #[serde(default)]
    pub download_dir: Option<String>,
}

/// Query parameters for GET /tasks
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct TaskListQuery {
    /// Filter by numeric status code (3 pending, 0 ongoing, 1 done, 2 error)
    pub status: Option<i32>,
    /// Maximum number of items to return (default: 100)
    pub limit: Option<i64>,
    /// Number of items to skip (default: 0)
    pub offset: Option<i64>,
}

/// State of the shared execution resource
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ResourceStatus {
    /// Whether the resource is running
    pub live: bool,
    /// Start counter of the live resource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    /// Endpoint drivers connect to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// X display of the auxiliary subsystem
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl From<Option<crate::resource::ResourceHandle>> for ResourceStatus {
    fn from(handle: Option<crate::resource::ResourceHandle>) -> Self {
        match handle {
            Some(handle) => Self {
                live: true,
                generation: Some(handle.generation()),
                endpoint: handle.endpoint().map(str::to_string),
                display: handle.display().map(str::to_string),
            },
            None => Self {
                live: false,
                generation: None,
                endpoint: None,
                display: None,
            },
        }
    }
}

/// Response body for POST /drivers/reload
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ReloadResponse {
    /// Whether the table was rebuilt now or after the current run
    pub outcome: crate::drivers::ReloadOutcome,
}

/// Response body for POST /run/cancel
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct CancelResponse {
    /// Whether a run was in progress
    pub cancelled: bool,
}
