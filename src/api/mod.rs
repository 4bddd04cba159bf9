//! REST API server module
//!
//! Provides an OpenAPI 3.1 compliant REST API for submitting tasks,
//! triggering runs and controlling the shared execution resource.

use crate::{Config, Dispatcher, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Prefix every API route is mounted under
pub const API_PREFIX: &str = "/api/v1";

/// Create the API router with all route definitions
///
/// Every route lives under `/api/v1`.
///
/// # Routes
///
/// ## Tasks
/// - `POST /tasks/single` - Route a URL to every matching driver
/// - `POST /tasks/single/special` - Submit to a named driver with extra content
/// - `POST /tasks/bulk` - Route many URLs sharing a download directory
/// - `GET /tasks` - List tasks (`?status=N` filters by status code)
/// - `GET /tasks/:uid` - Get a single task
/// - `POST /tasks/run` - Run pending work now
///
/// ## Drivers
/// - `GET /drivers` - List registered drivers
/// - `POST /drivers/reload` - Rebuild the driver table
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /events` - Server-sent events stream
/// - `GET /resource` - Shared resource state
/// - `POST /resource/init` - Start the shared resource
/// - `POST /resource/dispose` - Tear down the shared resource
/// - `POST /run/cancel` - Cancel the in-flight run
///
/// `GET /swagger-ui` serves interactive documentation when enabled.
pub fn create_router(dispatcher: Arc<Dispatcher>, config: Arc<Config>) -> Router {
    let state = AppState::new(dispatcher, config.clone());

    let api = Router::new()
        // Tasks
        .route("/tasks", get(routes::list_tasks))
        .route("/tasks/single", post(routes::submit_single))
        .route("/tasks/single/special", post(routes::submit_special))
        .route("/tasks/bulk", post(routes::submit_bulk))
        .route("/tasks/run", post(routes::run_tasks))
        .route("/tasks/:uid", get(routes::get_task))
        // Drivers
        .route("/drivers", get(routes::list_drivers))
        .route("/drivers/reload", post(routes::reload_drivers))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec))
        .route("/events", get(routes::event_stream))
        .route("/resource", get(routes::resource_status))
        .route("/resource/init", post(routes::init_resource))
        .route("/resource/dispose", post(routes::dispose_resource))
        .route("/run/cancel", post(routes::cancel_run));

    let router = Router::new().nest(API_PREFIX, api);

    // Merge Swagger UI routes if enabled in config (before applying state).
    // SwaggerUi registers its own spec route, which must not collide with /api/v1/openapi.json.
    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state);

    // Apply CORS middleware if enabled in config
    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// # Arguments
///
/// * `origins` - List of allowed origins (supports "*" for any origin)
///
/// # Returns
///
/// A configured CorsLayer that allows the specified origins, all methods,
/// and all headers for cross-origin requests.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    // Check if "*" (all origins) is in the list
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        // Allow all origins (default for local development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        // Allow specific origins
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Serves until `shutdown` is cancelled, then finishes in-flight requests and returns.
///
/// # Example
///
/// ```no_run
/// use batch_dispatch::{Config, Dispatcher};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let dispatcher = Arc::new(Dispatcher::new((*config).clone()).await?);
///
/// batch_dispatch::api::start_api_server(dispatcher, config, CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(
    dispatcher: Arc<Dispatcher>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(
        address = %bind_address,
        "Starting API server"
    );

    let app = create_router(dispatcher, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %listener.local_addr().unwrap_or(bind_address),
        "API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
