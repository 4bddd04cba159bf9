use super::*;
use crate::dispatcher::test_helpers::{TestDispatcher, create_test_dispatcher};
use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use std::time::Duration;
use tower::ServiceExt;

mod tasks;

/// Router over the standard test dispatcher
async fn create_test_app() -> (Router, TestDispatcher) {
    let t = create_test_dispatcher().await;
    let config = Arc::new(t.dispatcher.config().clone());
    let app = create_router(Arc::new(t.dispatcher.clone()), config);
    (app, t)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_api_server_serves_until_shutdown() {
    let t = create_test_dispatcher().await;

    let mut config = t.dispatcher.config().clone();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap(); // Port 0 = OS assigns a free port
    let config = Arc::new(config);

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(start_api_server(
        Arc::new(t.dispatcher.clone()),
        config,
        shutdown.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cors_enabled() {
    let t = create_test_dispatcher().await;

    let mut config = t.dispatcher.config().clone();
    config.api.cors_enabled = true;
    config.api.cors_origins = vec!["*".to_string()];
    let app = create_router(Arc::new(t.dispatcher.clone()), Arc::new(config));

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers().contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let t = create_test_dispatcher().await;

    let mut config = t.dispatcher.config().clone();
    config.api.cors_enabled = false;
    let app = create_router(Arc::new(t.dispatcher.clone()), Arc::new(config));

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert!(!response.headers().contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn test_routes_live_under_api_prefix() {
    let (app, _t) = create_test_app().await;

    let response = app.oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_swagger_ui_toggle() {
    let (app, t) = create_test_app().await;
    let response = app.oneshot(get_request("/api-docs/openapi.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut config = t.dispatcher.config().clone();
    config.api.swagger_ui = false;
    let app = create_router(Arc::new(t.dispatcher.clone()), Arc::new(config));
    let response = app.oneshot(get_request("/api-docs/openapi.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
