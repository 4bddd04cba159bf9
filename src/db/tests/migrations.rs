use crate::db::*;
use crate::types::NOT_DELETED;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_migrations_are_recorded_once() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1, 2]);
    db.close().await;

    // Reopening must not re-apply anything
    let db = Database::new(temp_file.path()).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 2);
    db.close().await;
}

#[tokio::test]
async fn test_new_rows_carry_not_deleted_sentinel() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = db
        .insert_task(&NewTask::new("https://example.com/a", "ns:pages"))
        .await
        .unwrap();
    let task = db.get_task(id).await.unwrap().unwrap();

    assert_eq!(task.deleted_at, NOT_DELETED);
    assert!(!task.is_deleted());
    db.close().await;
}

#[tokio::test]
async fn test_creates_missing_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("tasks.db");

    let db = Database::new(&path).await.unwrap();
    assert!(path.exists());
    db.close().await;
}
