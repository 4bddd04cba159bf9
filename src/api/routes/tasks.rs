//! Task submission, lookup and run handlers.

use super::{BulkTasksRequest, SingleTaskRequest, SpecialTaskRequest, TaskListQuery};
use crate::api::AppState;
use crate::error::ApiError;
use crate::types::{RunOutcome, TaskStatus};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

const DEFAULT_PAGE_SIZE: i64 = 100;

/// POST /tasks/single - Route one URL to every matching driver
#[utoipa::path(
    post,
    path = "/api/v1/tasks/single",
    tag = "tasks",
    request_body = SingleTaskRequest,
    responses(
        (status = 200, description = "Per-driver acceptance report", body = crate::types::SubmissionReport),
        (status = 503, description = "Shutting down", body = ApiError)
    )
)]
pub async fn submit_single(
    State(state): State<AppState>,
    Json(request): Json<SingleTaskRequest>,
) -> Response {
    match state.dispatcher.submit_single(&request.url).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, url = %request.url, "Failed to submit task");
            e.into_response()
        }
    }
}

/// POST /tasks/single/special - Submit one URL to a named driver with extra content
#[utoipa::path(
    post,
    path = "/api/v1/tasks/single/special",
    tag = "tasks",
    request_body = SpecialTaskRequest,
    responses(
        (status = 201, description = "Task stored", body = crate::types::AcceptedTask),
        (status = 409, description = "Duplicate submission", body = ApiError),
        (status = 422, description = "Unknown driver", body = ApiError)
    )
)]
pub async fn submit_special(
    State(state): State<AppState>,
    Json(request): Json<SpecialTaskRequest>,
) -> Response {
    match state
        .dispatcher
        .submit_special(
            &request.url,
            &request.driver,
            request.extra_content.as_deref(),
            request.download_dir.as_deref(),
        )
        .await
    {
        Ok(accepted) => (StatusCode::CREATED, Json(accepted)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /tasks/bulk - Route many URLs sharing a download directory
#[utoipa::path(
    post,
    path = "/api/v1/tasks/bulk",
    tag = "tasks",
    request_body = BulkTasksRequest,
    responses(
        (status = 200, description = "Per-record acceptance report", body = crate::types::SubmissionReport),
        (status = 503, description = "Shutting down", body = ApiError)
    )
)]
pub async fn submit_bulk(
    State(state): State<AppState>,
    Json(request): Json<BulkTasksRequest>,
) -> Response {
    match state
        .dispatcher
        .submit_bulk(&request.urls, request.download_dir.as_deref())
        .await
    {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, count = request.urls.len(), "Failed to submit bulk tasks");
            e.into_response()
        }
    }
}

/// GET /tasks/:uid - Get a task by its caller-assigned identifier
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{uid}",
    tag = "tasks",
    params(
        ("uid" = String, Path, description = "Task uid")
    ),
    responses(
        (status = 200, description = "Task record", body = crate::types::TaskRecord),
        (status = 404, description = "Task not found", body = ApiError)
    )
)]
pub async fn get_task(State(state): State<AppState>, Path(uid): Path<String>) -> Response {
    match state.dispatcher.task_by_uid(&uid).await {
        Ok(task) => (StatusCode::OK, Json(task)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /tasks - List tasks, optionally filtered by status code
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    tag = "tasks",
    params(
        ("status" = Option<i32>, Query, description = "Status code: 3 pending, 0 ongoing, 1 done, 2 error"),
        ("limit" = Option<i64>, Query, description = "Maximum number of items to return"),
        ("offset" = Option<i64>, Query, description = "Number of items to skip")
    ),
    responses(
        (status = 200, description = "Task records", body = Vec<crate::types::TaskRecord>),
        (status = 400, description = "Unknown status code", body = ApiError)
    )
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Response {
    let result = match query.status {
        Some(code) => match TaskStatus::from_i32(code) {
            Some(status) => state.dispatcher.tasks_by_status(status).await,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiError::validation(format!("unknown status code {code}"))),
                )
                    .into_response();
            }
        },
        None => {
            let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
            let offset = query.offset.unwrap_or(0).max(0);
            state.dispatcher.list_tasks(limit, offset).await
        }
    };

    match result {
        Ok(tasks) => (StatusCode::OK, Json(tasks)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list tasks");
            e.into_response()
        }
    }
}

/// POST /tasks/run - Run pending work now
#[utoipa::path(
    post,
    path = "/api/v1/tasks/run",
    tag = "tasks",
    responses(
        (status = 202, description = "Run finished", body = RunOutcome),
        (status = 409, description = "Another run holds the lock", body = RunOutcome),
        (status = 503, description = "Shutting down", body = ApiError)
    )
)]
pub async fn run_tasks(State(state): State<AppState>) -> Response {
    match state.dispatcher.run_pending().await {
        Ok(outcome) if outcome.is_locked() => {
            (StatusCode::CONFLICT, Json(outcome)).into_response()
        }
        Ok(outcome) => (StatusCode::ACCEPTED, Json(outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}
