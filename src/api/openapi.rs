//! OpenAPI documentation and schema generation
//!
//! This module defines the OpenAPI specification for the batch-dispatch REST API
//! using utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the batch-dispatch REST API
///
/// The spec can be accessed via:
/// - `/api/v1/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "batch-dispatch REST API",
        version = "0.1.0",
        description = "Submit tasks, trigger scheduling runs and control the shared execution resource",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:8081/api/v1", description = "Local development server")
    ),
    paths(
        // Tasks
        crate::api::routes::submit_single,
        crate::api::routes::submit_special,
        crate::api::routes::submit_bulk,
        crate::api::routes::get_task,
        crate::api::routes::list_tasks,
        crate::api::routes::run_tasks,

        // Drivers
        crate::api::routes::list_drivers,
        crate::api::routes::reload_drivers,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
        crate::api::routes::resource_status,
        crate::api::routes::init_resource,
        crate::api::routes::dispose_resource,
        crate::api::routes::cancel_run,
    ),
    components(schemas(
        // Core types
        crate::types::TaskId,
        crate::types::TaskStatus,
        crate::types::TaskRecord,
        crate::types::SubmissionKind,
        crate::types::AcceptedTask,
        crate::types::RejectedTask,
        crate::types::SubmissionReport,
        crate::types::RunOutcome,
        crate::types::SkipReason,
        crate::types::DriverInfo,
        crate::types::Event,
        crate::drivers::ReloadOutcome,
        crate::error::Phase,

        // API request/response types
        crate::api::routes::SingleTaskRequest,
        crate::api::routes::SpecialTaskRequest,
        crate::api::routes::BulkTasksRequest,
        crate::api::routes::TaskListQuery,
        crate::api::routes::ResourceStatus,
        crate::api::routes::ReloadResponse,
        crate::api::routes::CancelResponse,

        // Error types
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "tasks", description = "Tasks - Submit, look up and run pending work"),
        (name = "drivers", description = "Drivers - List registered drivers and reload them"),
        (name = "system", description = "System endpoints - Health, OpenAPI spec, events, resource control"),
    )
)]
pub struct ApiDoc;
