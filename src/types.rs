//! Core types for batch-dispatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Store-assigned identifier for a task record
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Task status
///
/// The persisted integer codes are a stable contract shared with other readers of the
/// store: Pending=3, Ongoing=0, Done=1, Error=2.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for the next run
    Pending,
    /// Picked up by a driver
    Ongoing,
    /// Reported finished by its driver
    Done,
    /// Failed permanently
    Error,
}

impl TaskStatus {
    /// Convert a persisted status code, `None` for codes outside the contract
    pub fn from_i32(status: i32) -> Option<Self> {
        match status {
            3 => Some(TaskStatus::Pending),
            0 => Some(TaskStatus::Ongoing),
            1 => Some(TaskStatus::Done),
            2 => Some(TaskStatus::Error),
            _ => None,
        }
    }

    /// Convert to the persisted status code
    pub fn to_i32(&self) -> i32 {
        match self {
            TaskStatus::Pending => 3,
            TaskStatus::Ongoing => 0,
            TaskStatus::Done => 1,
            TaskStatus::Error => 2,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition
    ///
    /// Pending may skip straight to a terminal state when a driver reports completion
    /// without the record having been marked Ongoing.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Ongoing)
                | (TaskStatus::Pending, TaskStatus::Done)
                | (TaskStatus::Pending, TaskStatus::Error)
                | (TaskStatus::Ongoing, TaskStatus::Done)
                | (TaskStatus::Ongoing, TaskStatus::Error)
        )
    }

    /// Statuses from which `self` may be reached
    pub fn predecessors(&self) -> Vec<TaskStatus> {
        [
            TaskStatus::Pending,
            TaskStatus::Ongoing,
            TaskStatus::Done,
            TaskStatus::Error,
        ]
        .into_iter()
        .filter(|from| from.can_transition_to(*self))
        .collect()
    }
}

/// How a submission is compared against the backlog for duplicates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    /// Compared against records sharing content and driver
    #[default]
    Regular,
    /// Compared against every record of the driver
    Special,
}

/// Far-future `deleted_at` value meaning "not deleted" (2077-01-01T08:00:00Z)
pub const NOT_DELETED: i64 = 3_376_713_600;

/// A task record as seen by drivers and API clients
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskRecord {
    /// Store-assigned identifier
    pub id: TaskId,
    /// Caller-assigned unique identifier (absent on legacy rows)
    pub uid: Option<String>,
    /// Target identifier, typically a URL
    pub content: String,
    /// Current status
    pub status: TaskStatus,
    /// Fully qualified driver identifier (`namespace:name`)
    pub driver: String,
    /// Destination partition key
    pub download_dir: Option<String>,
    /// Opaque extra payload for special submissions
    pub extra_content: Option<String>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record was last modified
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Identifier used for completion tracking: the uid, or the content for legacy rows
    pub fn completion_key(&self) -> &str {
        self.uid.as_deref().unwrap_or(&self.content)
    }
}

/// Why a run did not execute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another run holds the run lock
    Locked,
    /// No pending records
    EmptyBacklog,
}

/// Result of one scheduling run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The run did not execute
    Skipped {
        /// Reason for skipping
        reason: SkipReason,
    },
    /// Every batch ran; `done_count` identifiers were reported complete
    Completed {
        /// Size of the completion set
        done_count: usize,
    },
    /// A batch failed and the remaining batches were abandoned
    Failed {
        /// Failure description
        error: String,
    },
    /// The run was cancelled before finishing
    Cancelled,
}

impl RunOutcome {
    /// Whether the run was rejected because another run is active
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            RunOutcome::Skipped {
                reason: SkipReason::Locked
            }
        )
    }
}

/// Registered driver as reported by the registry listing
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DriverInfo {
    /// Driver name (without namespace)
    pub name: String,
    /// Fully qualified identifier stored on task records
    pub id: String,
    /// Whether records are submitted together
    pub can_merge_batch: bool,
    /// Downstream queue address
    pub queue_address: String,
    /// Last report returned by the driver, if it has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<serde_json::Value>,
}

/// Event emitted by the dispatcher
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A submission was accepted and stored
    TaskCreated {
        /// Store identifier
        id: TaskId,
        /// Caller-assigned identifier
        uid: Option<String>,
        /// Target identifier
        content: String,
        /// Driver identifier
        driver: String,
    },

    /// A submission was rejected as a duplicate
    DuplicateRejected {
        /// Target identifier
        content: String,
        /// Driver identifier
        driver: String,
        /// Rejection reason
        reason: String,
    },

    /// A run acquired the lock and found pending work
    RunStarted {
        /// Run identifier
        run_id: String,
        /// Number of pending records
        pending: usize,
        /// Number of planned batches
        batches: usize,
    },

    /// A batch payload was published and handed to its driver
    BatchDispatched {
        /// Run identifier
        run_id: String,
        /// Driver name
        driver: String,
        /// Records in the batch
        batch_size: usize,
        /// Partition key
        #[serde(skip_serializing_if = "Option::is_none")]
        download_dir: Option<String>,
    },

    /// A batch finished its lifecycle
    BatchCompleted {
        /// Run identifier
        run_id: String,
        /// Driver name
        driver: String,
        /// Completion identifiers contributed by this batch
        done: usize,
    },

    /// A run ended
    RunFinished {
        /// Run identifier (absent for runs skipped before starting)
        #[serde(skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        /// Outcome
        outcome: RunOutcome,
    },

    /// The shared execution resource became live
    ResourceAcquired {
        /// Endpoint drivers connect to
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// The shared execution resource was torn down
    ResourceReleased,

    /// The driver table was rebuilt
    DriversReloaded {
        /// Registered driver names
        drivers: Vec<String>,
    },

    /// Graceful shutdown initiated
    Shutdown,
}

/// A stored submission
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AcceptedTask {
    /// Store identifier
    pub id: TaskId,
    /// Generated or caller-supplied identifier
    pub uid: Option<String>,
    /// Target identifier
    pub content: String,
    /// Driver identifier
    pub driver: String,
}

/// A submission that was not stored
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RejectedTask {
    /// Target identifier
    pub content: String,
    /// Driver the submission was routed to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Why it was rejected
    pub reason: String,
}

/// Result of a single, special or bulk submission
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SubmissionReport {
    /// Records stored
    pub accepted: Vec<AcceptedTask>,
    /// Records rejected (duplicates, unroutable targets)
    pub rejected: Vec<RejectedTask>,
}

impl SubmissionReport {
    /// Whether at least one record was stored
    pub fn status(&self) -> bool {
        !self.accepted.is_empty()
    }
}
