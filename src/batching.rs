//! Batch planning
//!
//! Pending records are grouped by driver, then partitioned by destination directory:
//!
//! 1. Groups are visited in order of first appearance in the backlog
//! 2. Groups outside the namespace, or naming an unregistered driver, are skipped
//! 3. Each group splits into the records without a `download_dir`, followed by one
//!    partition per distinct `download_dir` (again in order of first appearance)
//! 4. A mergeable driver gets one batch per partition; any other driver gets one batch
//!    per record

use crate::drivers::{DriverTable, RegisteredDriver};
use crate::types::TaskRecord;
use std::collections::HashMap;
use std::sync::Arc;

/// Records submitted together to one driver invocation
#[derive(Clone, Debug)]
pub struct Batch {
    /// Driver receiving the batch
    pub driver: Arc<RegisteredDriver>,
    /// Partition key shared by every record
    pub download_dir: Option<String>,
    /// Records in backlog order
    pub records: Vec<TaskRecord>,
}

impl Batch {
    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Partitions a pending backlog into executable batches
#[derive(Clone, Debug)]
pub struct BatchScheduler {
    prefix: String,
}

impl BatchScheduler {
    /// Scheduler accepting drivers in `namespace`
    pub fn new(namespace: &str) -> Self {
        Self {
            prefix: format!("{}:", namespace),
        }
    }

    /// Plan the batches for one run
    ///
    /// An empty backlog yields no batches.
    pub fn plan(&self, pending: Vec<TaskRecord>, drivers: &DriverTable) -> Vec<Batch> {
        let mut batches = Vec::new();

        for (driver_id, records) in group_in_order(pending, |r| r.driver.clone()) {
            let Some(name) = driver_id.strip_prefix(&self.prefix) else {
                tracing::debug!(driver = %driver_id, records = records.len(), "Skipping foreign driver");
                continue;
            };
            let Some(driver) = drivers.get(name) else {
                tracing::warn!(
                    driver = %driver_id,
                    records = records.len(),
                    "Skipping records for unregistered driver"
                );
                continue;
            };

            for (download_dir, partition) in partition_by_dir(records) {
                if driver.can_merge_batch {
                    batches.push(Batch {
                        driver: driver.clone(),
                        download_dir,
                        records: partition,
                    });
                } else {
                    batches.extend(partition.into_iter().map(|record| Batch {
                        driver: driver.clone(),
                        download_dir: download_dir.clone(),
                        records: vec![record],
                    }));
                }
            }
        }

        tracing::debug!(batches = batches.len(), "Batches planned");
        batches
    }
}

/// The null-dir partition first (when non-empty), then each distinct directory
fn partition_by_dir(records: Vec<TaskRecord>) -> Vec<(Option<String>, Vec<TaskRecord>)> {
    let (without_dir, with_dir): (Vec<_>, Vec<_>) =
        records.into_iter().partition(|r| r.download_dir.is_none());

    let mut partitions = Vec::new();
    if !without_dir.is_empty() {
        partitions.push((None, without_dir));
    }
    partitions.extend(
        group_in_order(with_dir, |r| r.download_dir.clone().unwrap_or_default())
            .into_iter()
            .map(|(dir, records)| (Some(dir), records)),
    );
    partitions
}

/// Stable grouping: groups ordered by first appearance, records keep their order
fn group_in_order<F>(records: Vec<TaskRecord>, key: F) -> Vec<(String, Vec<TaskRecord>)>
where
    F: Fn(&TaskRecord) -> String,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<TaskRecord>)> = Vec::new();

    for record in records {
        let k = key(&record);
        match index.get(&k) {
            Some(&i) => groups[i].1.push(record),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push((k, vec![record]));
            }
        }
    }
    groups
}
