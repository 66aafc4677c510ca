//! Core types for download-tasks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key under which the storage name of a fetched artifact is recorded.
///
/// Written by the execution pipeline when a task reaches [`Status::Success`] and
/// read back by [`TaskManager::get_task_file`](crate::TaskManager::get_task_file).
/// The key is present if and only if the task status is `Success`.
pub const FILE_NAME_METADATA_KEY: &str = "file-name";

macro_rules! sqlite_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

sqlite_id!(TaskId, "Unique, monotonically assigned identifier of a download task");
sqlite_id!(AccountId, "Identifier of the account owning a download task");

/// Download task status
///
/// Legal edges: `Pending -> Downloading -> {Success, Failed}` through the
/// execution pipeline, and `{Downloading, Failed} -> Pending` through the
/// recovery sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting to be claimed by an executor
    Pending,
    /// Claimed by exactly one executor
    Downloading,
    /// Fetch failed; re-armed by the recovery sweep unless marked permanent
    Failed,
    /// Artifact stored, file name recorded in metadata
    Success,
}

impl Status {
    /// Convert integer status code to Status enum
    ///
    /// Unknown codes map to `Failed` so a corrupt row is never executed.
    pub fn from_i32(status: i32) -> Self {
        match status {
            1 => Status::Pending,
            2 => Status::Downloading,
            3 => Status::Failed,
            4 => Status::Success,
            _ => Status::Failed,
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Pending => 1,
            Status::Downloading => 2,
            Status::Failed => 3,
            Status::Success => 4,
        }
    }

    /// `Success` or `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Failed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Pending => "pending",
            Status::Downloading => "downloading",
            Status::Failed => "failed",
            Status::Success => "success",
        };
        f.write_str(name)
    }
}

/// Download protocol of a task
///
/// Only HTTP has a downloader. Any other stored code round-trips as
/// `Unsupported` so it can be recognised and failed permanently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadType {
    /// Plain HTTP(S) GET
    Http,
    /// Recognised but not implemented; carries the raw code
    Unsupported(i32),
}

impl DownloadType {
    /// Convert integer type code to DownloadType
    pub fn from_i32(code: i32) -> Self {
        match code {
            1 => DownloadType::Http,
            other => DownloadType::Unsupported(other),
        }
    }

    /// Convert DownloadType to integer type code
    pub fn to_i32(&self) -> i32 {
        match self {
            DownloadType::Http => 1,
            DownloadType::Unsupported(code) => *code,
        }
    }
}

/// Scalar value stored in task metadata
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean flag
    Bool(bool),
    /// Signed integer (byte counts, status codes)
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Free-form text
    Text(String),
}

impl MetadataValue {
    /// Borrow the value as text, if it is text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<u64> for MetadataValue {
    fn from(value: u64) -> Self {
        MetadataValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

/// Open key-value bag filled by downloaders
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A download task as seen by callers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Task ID
    pub id: TaskId,
    /// Owning account (immutable)
    pub owner: AccountId,
    /// Download protocol
    pub download_type: DownloadType,
    /// Target resource
    pub url: String,
    /// Current status
    pub status: Status,
    /// Downloader-provided result data
    pub metadata: Metadata,
    /// Message of the last failed attempt
    pub error_message: Option<String>,
    /// Whether the recovery sweep may re-arm a failed task
    pub retryable: bool,
    /// Claims made so far; each claim increments it and terminal writes must match it
    pub attempt: i64,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// When the row was last written
    pub updated_at: DateTime<Utc>,
}

impl DownloadTask {
    /// Storage name recorded for a successful task
    pub fn file_name(&self) -> Option<&str> {
        self.metadata
            .get(FILE_NAME_METADATA_KEY)
            .and_then(MetadataValue::as_str)
    }
}

/// One page of an account's tasks
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskPage {
    /// Total number of tasks owned by the account
    pub total: u64,
    /// Tasks in this page, ordered by id
    pub tasks: Vec<DownloadTask>,
}

/// Notification that a task row was committed
///
/// Carries only the id; receivers re-read authoritative state from the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCreated {
    /// The new task's id
    pub id: TaskId,
}

/// Result of a claim attempt
#[derive(Clone, Debug, PartialEq)]
pub enum ClaimOutcome {
    /// This caller moved the task to `Downloading`
    Claimed {
        /// The row as it was before the claim
        task: DownloadTask,
        /// Attempt number owned by this claim; terminal writes carry it
        attempt: i64,
    },
    /// The task was missing or not pending; nothing to do
    Skipped,
}

/// Pipeline events broadcast to subscribers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A task was created and its creation event published
    TaskCreated {
        /// Task ID
        id: TaskId,
    },
    /// An executor claimed the task
    TaskClaimed {
        /// Task ID
        id: TaskId,
    },
    /// The task's artifact was stored
    TaskSucceeded {
        /// Task ID
        id: TaskId,
        /// Storage name of the artifact
        file_name: String,
    },
    /// The attempt failed
    TaskFailed {
        /// Task ID
        id: TaskId,
        /// Failure message
        error: String,
        /// Whether the recovery sweep will re-arm it
        retryable: bool,
    },
    /// The owner deleted the task
    TaskDeleted {
        /// Task ID
        id: TaskId,
    },
    /// The recovery sweep re-armed stuck tasks
    TasksReclaimed {
        /// Number of rows reset to pending
        count: u64,
    },
    /// The manager is shutting down
    Shutdown,
}
