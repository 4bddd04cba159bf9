//! End-to-end flow through the public API with the built-in command driver
//!
//! The driver runs `sh`, so these tests only run on Unix.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use batch_dispatch::{
    Config, Dispatcher, MemoryQueueBridge, QueueBridge, RunOutcome, TaskStatus,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Config with one mergeable command driver reporting `done` as finished
fn config_with_script(temp_dir: &TempDir, done: &str) -> Config {
    let db_path = temp_dir.path().join("dispatch.db");
    let script = format!("cat > /dev/null; echo '{{\"done_tasks\": [{done}], \"pages\": 2}}'");
    let raw = format!(
        r#"
routing = [{{ pattern = "^https://example\\.com/", driver = "pages" }}]

[extensions]
namespace = "e2e"

[extensions.drivers.pages]
kind = "command"
queue_address = "redis://127.0.0.1:6379/3"

[extensions.drivers.pages.settings]
program = "sh"
args = ["-c", {script:?}]

[persistence]
database_path = {db:?}
"#,
        script = script,
        db = db_path.display().to_string(),
    );
    Config::from_toml(&raw).unwrap()
}

async fn dispatcher_with(config: Config) -> (Dispatcher, Arc<MemoryQueueBridge>) {
    let bridge = Arc::new(MemoryQueueBridge::new());
    let dispatcher = Dispatcher::builder(config)
        .bridge(bridge.clone() as Arc<dyn QueueBridge>)
        .build()
        .await
        .unwrap();
    (dispatcher, bridge)
}

#[tokio::test]
async fn command_driver_reports_completion_by_content() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_with_script(&temp_dir, r#""https://example.com/a""#);
    let (dispatcher, bridge) = dispatcher_with(config).await;

    let report = dispatcher
        .submit_bulk(
            &[
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string(),
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(report.accepted.len(), 2);

    let outcome = dispatcher.run_pending().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { done_count: 1 });

    let done = dispatcher.tasks_by_status(TaskStatus::Done).await.unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].content, "https://example.com/a");
    let pending = dispatcher.tasks_by_status(TaskStatus::Pending).await.unwrap();
    assert_eq!(pending.len(), 1);

    // One merged batch was published under the driver name
    let payload: serde_json::Value =
        serde_json::from_str(&bridge.latest("pages").await.unwrap()).unwrap();
    assert_eq!(payload["tasks"].as_array().unwrap().len(), 2);

    // Extra keys from the program's report are kept for observers
    let drivers = dispatcher.drivers().await;
    assert_eq!(drivers[0].last_report.as_ref().unwrap()["pages"], 2);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn failing_program_leaves_backlog_pending() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = config_with_script(&temp_dir, "");
    config
        .extensions
        .drivers
        .get_mut("pages")
        .unwrap()
        .settings
        .insert("args".into(), serde_json::json!(["-c", "exit 3"]));
    let (dispatcher, _bridge) = dispatcher_with(config).await;

    dispatcher.submit_single("https://example.com/a").await.unwrap();

    let outcome = dispatcher.run_pending().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Failed { .. }), "{outcome:?}");
    assert_eq!(
        dispatcher.tasks_by_status(TaskStatus::Pending).await.unwrap().len(),
        1
    );
    // The resource is kept for the next run
    assert!(dispatcher.resource().await.is_some());

    dispatcher.shutdown().await.unwrap();
}
