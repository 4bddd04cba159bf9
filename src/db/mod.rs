//! Database layer for batch-dispatch
//!
//! Handles SQLite persistence for the task backlog.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`tasks`] - Task record CRUD, duplicate-candidate queries, status reconciliation

use crate::types::{NOT_DELETED, TaskId, TaskRecord, TaskStatus};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod tasks;

/// New task record to be inserted into the database
///
/// Records are always inserted as Pending.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    /// Caller-assigned unique identifier
    pub uid: Option<String>,
    /// Target identifier, typically a URL
    pub content: String,
    /// Fully qualified driver identifier (`namespace:name`)
    pub driver: String,
    /// Destination partition key
    pub download_dir: Option<String>,
    /// Opaque extra payload
    pub extra_content: Option<String>,
}

impl NewTask {
    /// Candidate with content and driver only
    pub fn new(content: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            uid: None,
            content: content.into(),
            driver: driver.into(),
            download_dir: None,
            extra_content: None,
        }
    }

    /// Set the caller-assigned identifier
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Set the destination partition key
    pub fn with_download_dir(mut self, dir: impl Into<String>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Set the opaque extra payload
    pub fn with_extra_content(mut self, extra: impl Into<String>) -> Self {
        self.extra_content = Some(extra.into());
        self
    }
}

/// Task row from database
#[derive(Debug, Clone, FromRow)]
pub struct Task {
    /// Unique database ID
    pub id: i64,
    /// Caller-assigned unique identifier
    pub uid: Option<String>,
    /// Target identifier
    pub content: String,
    /// Status code (Pending=3, Ongoing=0, Done=1, Error=2)
    pub status: i32,
    /// Driver identifier
    pub driver: String,
    /// Destination partition key
    pub download_dir: Option<String>,
    /// Opaque extra payload
    pub extra_content: Option<String>,
    /// Unix timestamp when the task was created
    pub created_at: i64,
    /// Unix timestamp of the last modification
    pub updated_at: i64,
    /// Unix timestamp of soft deletion ([`NOT_DELETED`] when live)
    pub deleted_at: i64,
}

impl Task {
    /// Whether the row has been soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at != NOT_DELETED
    }
}

impl TryFrom<Task> for TaskRecord {
    type Error = crate::Error;

    fn try_from(row: Task) -> crate::Result<Self> {
        let status = TaskStatus::from_i32(row.status).ok_or_else(|| {
            crate::Error::Database(crate::error::DatabaseError::QueryFailed(format!(
                "task {} has unknown status code {}",
                row.id, row.status
            )))
        })?;

        Ok(TaskRecord {
            id: TaskId(row.id),
            uid: row.uid,
            content: row.content,
            status,
            driver: row.driver,
            download_dir: row.download_dir,
            extra_content: row.extra_content,
            created_at: timestamp(row.created_at),
            updated_at: timestamp(row.updated_at),
        })
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Database handle for batch-dispatch
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
