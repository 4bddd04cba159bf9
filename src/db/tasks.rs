//! Task record CRUD, duplicate-candidate queries and status reconciliation.

use crate::error::DatabaseError;
use crate::types::{TaskId, TaskRecord, TaskStatus};
use crate::{Error, Result};
use sqlx::{QueryBuilder, Sqlite};

use super::{Database, NewTask, Task};

/// Identifiers per reconciliation statement.
///
/// Each identifier is bound twice (uid and content), keeping a chunk well below SQLite's
/// default limit of 999 bound parameters.
const RECONCILE_CHUNK: usize = 400;

const TASK_COLUMNS: &str = r#"
    id, uid, content, status, driver, download_dir, extra_content,
    created_at, updated_at, deleted_at
"#;

impl Database {
    /// Insert a new task record with status Pending
    pub async fn insert_task(&self, task: &NewTask) -> Result<TaskId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                uid, content, status, driver, download_dir, extra_content,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.uid)
        .bind(&task.content)
        .bind(TaskStatus::Pending.to_i32())
        .bind(&task.driver)
        .bind(&task.download_dir)
        .bind(&task.extra_content)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(DatabaseError::from_sqlx("Failed to insert task", e)))?;

        Ok(TaskId(result.last_insert_rowid()))
    }

    /// Get a task by store ID
    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks WHERE id = ?",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(DatabaseError::from_sqlx("Failed to get task", e)))?;

        Ok(row)
    }

    /// Get a task by its caller-assigned uid
    pub async fn get_task_by_uid(&self, uid: &str) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks WHERE uid = ? ORDER BY id LIMIT 1",
            TASK_COLUMNS
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(DatabaseError::from_sqlx("Failed to get task by uid", e)))?;

        Ok(row)
    }

    /// List tasks with a given status in insertion order
    pub async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks WHERE status = ? ORDER BY id",
            TASK_COLUMNS
        ))
        .bind(status.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::from_sqlx("Failed to list tasks by status", e))
        })?;

        Ok(rows)
    }

    /// List tasks page by page, newest first
    pub async fn list_tasks(&self, limit: i64, offset: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks ORDER BY id DESC LIMIT ? OFFSET ?",
            TASK_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(DatabaseError::from_sqlx("Failed to list tasks", e)))?;

        Ok(rows)
    }

    /// Existing records sharing both content and driver (regular duplicate candidates)
    pub async fn find_by_content_and_driver(
        &self,
        content: &str,
        driver: &str,
    ) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks WHERE content = ? AND driver = ? ORDER BY id",
            TASK_COLUMNS
        ))
        .bind(content)
        .bind(driver)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::from_sqlx(
                "Failed to find tasks by content and driver",
                e,
            ))
        })?;

        Ok(rows)
    }

    /// Every existing record of a driver (special duplicate candidates)
    pub async fn find_by_driver(&self, driver: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks WHERE driver = ? ORDER BY id",
            TASK_COLUMNS
        ))
        .bind(driver)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::from_sqlx("Failed to find tasks by driver", e))
        })?;

        Ok(rows)
    }

    /// Count tasks with a given status
    pub async fn count_by_status(&self, status: TaskStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = ?")
            .bind(status.to_i32())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::from_sqlx("Failed to count tasks by status", e))
            })?;

        Ok(count)
    }

    /// Set `status` on every record whose uid or content is in `identifiers`
    ///
    /// Only forward transitions are applied: records already at or past `status` are left
    /// untouched. All chunks are written in one transaction. Returns the number of rows
    /// updated.
    pub async fn mark_status_where_identifier_in(
        &self,
        status: TaskStatus,
        identifiers: &[String],
    ) -> Result<u64> {
        let from = status.predecessors();
        if identifiers.is_empty() || from.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::from_sqlx("Failed to begin status update", e))
        })?;

        let mut updated = 0;
        for chunk in identifiers.chunks(RECONCILE_CHUNK) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE tasks SET status = ");
            query.push_bind(status.to_i32());
            query.push(", updated_at = ");
            query.push_bind(now);

            query.push(" WHERE status IN (");
            {
                let mut separated = query.separated(", ");
                for s in &from {
                    separated.push_bind(s.to_i32());
                }
            }
            query.push(") AND (uid IN (");
            push_identifiers(&mut query, chunk);
            query.push(") OR content IN (");
            push_identifiers(&mut query, chunk);
            query.push("))");

            let result = query.build().execute(&mut *tx).await.map_err(|e| {
                Error::Database(DatabaseError::from_sqlx("Failed to update task status", e))
            })?;
            updated += result.rows_affected();
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::from_sqlx("Failed to commit status update", e))
        })?;

        tracing::debug!(
            status = ?status,
            identifiers = identifiers.len(),
            updated,
            "Task status reconciled"
        );
        Ok(updated)
    }

    /// Pending records converted for scheduling
    pub async fn pending_records(&self) -> Result<Vec<TaskRecord>> {
        self.list_tasks_by_status(TaskStatus::Pending)
            .await?
            .into_iter()
            .map(TaskRecord::try_from)
            .collect()
    }
}

fn push_identifiers<'a>(query: &mut QueryBuilder<'a, Sqlite>, identifiers: &'a [String]) {
    let mut separated = query.separated(", ");
    for id in identifiers {
        separated.push_bind(id.as_str());
    }
}
