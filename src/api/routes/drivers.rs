//! Driver registry handlers.

use super::ReloadResponse;
use crate::api::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// GET /drivers - List registered drivers
#[utoipa::path(
    get,
    path = "/api/v1/drivers",
    tag = "drivers",
    responses(
        (status = 200, description = "Registered drivers with their last report", body = Vec<crate::types::DriverInfo>)
    )
)]
pub async fn list_drivers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dispatcher.drivers().await)
}

/// POST /drivers/reload - Rebuild the driver table from configuration
///
/// Deferred until the end of the current run when one is in progress.
#[utoipa::path(
    post,
    path = "/api/v1/drivers/reload",
    tag = "drivers",
    responses(
        (status = 200, description = "Table rebuilt", body = ReloadResponse),
        (status = 202, description = "Reload deferred until the current run ends", body = ReloadResponse),
        (status = 400, description = "Driver configuration is invalid", body = crate::error::ApiError)
    )
)]
pub async fn reload_drivers(State(state): State<AppState>) -> Response {
    match state.dispatcher.reload_drivers().await {
        Ok(outcome) => {
            let status = match outcome {
                crate::drivers::ReloadOutcome::Applied => StatusCode::OK,
                crate::drivers::ReloadOutcome::Deferred => StatusCode::ACCEPTED,
            };
            (status, Json(ReloadResponse { outcome })).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Driver reload failed");
            e.into_response()
        }
    }
}
