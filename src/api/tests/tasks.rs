use super::*;
use crate::drivers::testing::{Gate, ScriptedDriver};
use crate::dispatcher::test_helpers::{create_dispatcher_with, route};
use serde_json::json;

#[tokio::test]
async fn test_submit_single_reports_each_driver() {
    let (app, _t) = create_test_app().await;

    let response = app
        .oneshot(post_json(
            "/api/v1/tasks/single",
            json!({"url": "https://example.com/watch?v=9"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let accepted = body["accepted"].as_array().unwrap();
    assert_eq!(accepted.len(), 2);
    assert_eq!(accepted[0]["driver"], "collect:pages");
    assert_eq!(accepted[1]["driver"], "collect:video");
    assert!(body["rejected"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_submit_single_unroutable() {
    let (app, _t) = create_test_app().await;

    let response = app
        .oneshot(post_json("/api/v1/tasks/single", json!({"url": "ftp://nowhere"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["accepted"].as_array().unwrap().is_empty());
    assert_eq!(body["rejected"][0]["content"], "ftp://nowhere");
    assert!(body["rejected"][0].get("driver").is_none());
}

#[tokio::test]
async fn test_submit_special_and_duplicate() {
    let (app, _t) = create_test_app().await;
    let request = json!({
        "url": "https://example.com/a",
        "driver": "pages",
        "extra_content": "depth=1",
        "download_dir": "crawl"
    });

    let response = app
        .clone()
        .oneshot(post_json("/api/v1/tasks/single/special", request.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let accepted = json_body(response).await;
    assert_eq!(accepted["driver"], "collect:pages");

    let response = app
        .oneshot(post_json("/api/v1/tasks/single/special", request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"]["code"], "duplicate");
}

#[tokio::test]
async fn test_submit_special_unknown_driver() {
    let (app, _t) = create_test_app().await;

    let response = app
        .oneshot(post_json(
            "/api/v1/tasks/single/special",
            json!({"url": "https://example.com/a", "driver": "audio"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["error"]["code"], "unknown_driver");
}

#[tokio::test]
async fn test_submit_bulk_and_lookup() {
    let (app, _t) = create_test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/tasks/bulk",
            json!({
                "urls": ["https://example.com/a", "https://example.com/b"],
                "download_dir": "batch-7"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let uid = body["accepted"][1]["uid"].as_str().unwrap().to_string();

    let response = app
        .oneshot(get_request(&format!("/api/v1/tasks/{uid}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let task = json_body(response).await;
    assert_eq!(task["content"], "https://example.com/b");
    assert_eq!(task["download_dir"], "batch-7");
    assert_eq!(task["status"], "pending");
}

#[tokio::test]
async fn test_get_task_not_found() {
    let (app, _t) = create_test_app().await;

    let response = app.oneshot(get_request("/api/v1/tasks/missing")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_list_tasks_by_status() {
    let (app, t) = create_test_app().await;
    t.dispatcher.submit_single("https://example.com/a").await.unwrap();
    t.dispatcher.submit_single("https://example.com/b").await.unwrap();

    let response = app
        .clone()
        .oneshot(get_request("/api/v1/tasks?status=3"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await.as_array().unwrap().len(), 2);

    let response = app
        .clone()
        .oneshot(get_request("/api/v1/tasks?status=1"))
        .await
        .unwrap();
    assert!(json_body(response).await.as_array().unwrap().is_empty());

    let response = app
        .clone()
        .oneshot(get_request("/api/v1/tasks?limit=1"))
        .await
        .unwrap();
    assert_eq!(json_body(response).await.as_array().unwrap().len(), 1);

    let response = app
        .oneshot(get_request("/api/v1/tasks?status=42"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_run_completes_pending_work() {
    let (app, t) = create_test_app().await;
    t.dispatcher.submit_single("https://example.com/a").await.unwrap();

    let response = app.oneshot(post_empty("/api/v1/tasks/run")).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["outcome"], "completed");
    assert_eq!(body["done_count"], 1);
}

#[tokio::test]
async fn test_run_with_empty_backlog_is_skipped() {
    let (app, _t) = create_test_app().await;

    let response = app.oneshot(post_empty("/api/v1/tasks/run")).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["outcome"], "skipped");
    assert_eq!(body["reason"], "empty_backlog");
}

#[tokio::test]
async fn test_run_while_locked_conflicts() {
    let gate = Arc::new(Gate::default());
    let t = create_dispatcher_with(
        vec![ScriptedDriver::new("pages", true).gated(gate.clone())],
        vec![route("example", "pages")],
    )
    .await;
    t.dispatcher.submit_single("https://example.com/a").await.unwrap();
    let app = create_router(
        Arc::new(t.dispatcher.clone()),
        Arc::new(t.dispatcher.config().clone()),
    );

    let first = t.dispatcher.spawn_run().unwrap();
    gate.entered.notified().await;

    let response = app.oneshot(post_empty("/api/v1/tasks/run")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["reason"], "locked");

    gate.release.notify_one();
    first.await.unwrap();
}

#[tokio::test]
async fn test_submissions_refused_after_shutdown() {
    let (app, t) = create_test_app().await;
    t.dispatcher.shutdown().await.unwrap();

    let response = app
        .oneshot(post_json(
            "/api/v1/tasks/single",
            json!({"url": "https://example.com/a"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"]["code"], "shutting_down");
}
