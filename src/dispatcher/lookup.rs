//! Record and driver queries

use super::Dispatcher;
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::{DriverInfo, TaskRecord, TaskStatus};
use std::collections::BTreeMap;

impl Dispatcher {
    /// Fetch one record by uid
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no record carries `uid`.
    pub async fn task_by_uid(&self, uid: &str) -> Result<TaskRecord> {
        let task = with_retry(&self.config.retry, "get task by uid", || {
            self.db.get_task_by_uid(uid)
        })
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {}", uid)))?;
        TaskRecord::try_from(task)
    }

    /// Every record with `status`, oldest first
    pub async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>> {
        with_retry(&self.config.retry, "list tasks by status", || {
            self.db.list_tasks_by_status(status)
        })
        .await?
        .into_iter()
        .map(TaskRecord::try_from)
        .collect()
    }

    /// A page of records, newest first
    pub async fn list_tasks(&self, limit: i64, offset: i64) -> Result<Vec<TaskRecord>> {
        with_retry(&self.config.retry, "list tasks", || {
            self.db.list_tasks(limit, offset)
        })
        .await?
        .into_iter()
        .map(TaskRecord::try_from)
        .collect()
    }

    /// Number of records per status
    pub async fn status_counts(&self) -> Result<BTreeMap<TaskStatus, i64>> {
        let mut counts = BTreeMap::new();
        for status in [
            TaskStatus::Pending,
            TaskStatus::Ongoing,
            TaskStatus::Done,
            TaskStatus::Error,
        ] {
            let count = with_retry(&self.config.retry, "count tasks by status", || {
                self.db.count_by_status(status)
            })
            .await?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    /// Registered drivers with their latest reports, ordered by name
    pub async fn drivers(&self) -> Vec<DriverInfo> {
        self.registry.list().await
    }
}
