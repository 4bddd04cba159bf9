//! System handlers: health, OpenAPI, events, resource control, run cancellation.

use super::{CancelResponse, ResourceStatus};
use crate::api::AppState;
use crate::types::Event;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

/// GET /health - Health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy")
    )
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "running": state.dispatcher.is_running()
    }))
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/api/v1/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI 3.1 specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}

/// SSE event name for a dispatcher event
fn event_name(event: &Event) -> &'static str {
    match event {
        Event::TaskCreated { .. } => "task_created",
        Event::DuplicateRejected { .. } => "duplicate_rejected",
        Event::RunStarted { .. } => "run_started",
        Event::BatchDispatched { .. } => "batch_dispatched",
        Event::BatchCompleted { .. } => "batch_completed",
        Event::RunFinished { .. } => "run_finished",
        Event::ResourceAcquired { .. } => "resource_acquired",
        Event::ResourceReleased => "resource_released",
        Event::DriversReloaded { .. } => "drivers_reloaded",
        Event::Shutdown => "shutdown",
    }
}

/// GET /events - Server-sent events stream
#[utoipa::path(
    get,
    path = "/api/v1/events",
    tag = "system",
    responses(
        (status = 200, description = "Server-sent events stream (text/event-stream)", content_type = "text/event-stream")
    )
)]
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let receiver = state.dispatcher.subscribe();
    let stream = BroadcastStream::new(receiver);

    let sse_stream = stream.filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json_data) => Some(Ok(SseEvent::default()
                .event(event_name(&event))
                .data(json_data))),
            Err(e) => {
                tracing::warn!("Failed to serialize event to JSON: {}", e);
                None
            }
        },
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!("SSE client lagged, skipped {} events", skipped);
            Some(Ok(SseEvent::default().event("error").data(format!(
                r#"{{"error":"lagged","skipped":{}}}"#,
                skipped
            ))))
        }
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

/// GET /resource - State of the shared execution resource
#[utoipa::path(
    get,
    path = "/api/v1/resource",
    tag = "system",
    responses(
        (status = 200, description = "Resource state", body = ResourceStatus)
    )
)]
pub async fn resource_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ResourceStatus::from(state.dispatcher.resource().await))
}

/// POST /resource/init - Start the shared resource ahead of the next run
#[utoipa::path(
    post,
    path = "/api/v1/resource/init",
    tag = "system",
    responses(
        (status = 200, description = "Resource is live", body = ResourceStatus),
        (status = 409, description = "A run is in progress", body = crate::error::ApiError),
        (status = 503, description = "Resource failed to start", body = crate::error::ApiError)
    )
)]
pub async fn init_resource(State(state): State<AppState>) -> Response {
    match state.dispatcher.init_resource().await {
        Ok(handle) => (StatusCode::OK, Json(ResourceStatus::from(Some(handle)))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /resource/dispose - Tear down the shared resource
#[utoipa::path(
    post,
    path = "/api/v1/resource/dispose",
    tag = "system",
    responses(
        (status = 204, description = "Resource released or already down"),
        (status = 409, description = "A run is in progress", body = crate::error::ApiError)
    )
)]
pub async fn dispose_resource(State(state): State<AppState>) -> Response {
    match state.dispatcher.dispose_resource().await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to dispose resource");
            e.into_response()
        }
    }
}

/// POST /run/cancel - Cancel the in-flight run
#[utoipa::path(
    post,
    path = "/api/v1/run/cancel",
    tag = "system",
    responses(
        (status = 200, description = "Whether a run was cancelled", body = CancelResponse)
    )
)]
pub async fn cancel_run(State(state): State<AppState>) -> impl IntoResponse {
    let cancelled = state.dispatcher.cancel_run().await;
    Json(CancelResponse { cancelled })
}
