//! Database layer for download-tasks
//!
//! SQLite is the task store and the durable half of the creation event channel.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`tasks`] - Download task rows, row locking, bulk recovery
//! - [`events`] - Transactional outbox for creation events
//!
//! ## Locking
//!
//! Operations that change a task's status run inside a transaction started with
//! [`Database::begin`] and read the row through [`Database::lock_task`], which
//! takes SQLite's write lock before returning the row. A second transaction trying
//! to lock any row waits (up to the configured busy timeout) until the first commits
//! or rolls back, so two claimants of the same id are strictly serialized.

use crate::error::DatabaseError;
use crate::types::{AccountId, DownloadTask, DownloadType, Metadata, Status, TaskId};
use chrono::{TimeZone, Utc};
use sqlx::{FromRow, Sqlite, Transaction, sqlite::SqlitePool};

mod events;
mod migrations;
mod tasks;

/// A transaction holding the store's write lock once a row has been locked
pub type Tx = Transaction<'static, Sqlite>;

/// New download task to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Owning account
    pub owner: AccountId,
    /// Download protocol
    pub download_type: DownloadType,
    /// Target URL
    pub url: String,
}

/// Download task record from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Unique database ID
    pub id: i64,
    /// Owning account
    pub owner_account_id: i64,
    /// Download type code (1 = HTTP)
    pub download_type: i32,
    /// Target URL
    pub url: String,
    /// Status code (see [`Status::from_i32`])
    pub status: i32,
    /// JSON-encoded metadata object
    pub metadata: String,
    /// Message of the last failed attempt
    pub error_message: Option<String>,
    /// 1 when the recovery sweep may re-arm a failure
    pub retryable: i32,
    /// Number of claims made so far
    pub attempt: i64,
    /// Unix timestamp when the task was created
    pub created_at: i64,
    /// Unix timestamp of the last write
    pub updated_at: i64,
}

impl TryFrom<TaskRow> for DownloadTask {
    type Error = DatabaseError;

    fn try_from(row: TaskRow) -> std::result::Result<Self, Self::Error> {
        let metadata: Metadata = serde_json::from_str(&row.metadata).map_err(|e| {
            DatabaseError::CorruptRow(format!("metadata of task {}: {}", row.id, e))
        })?;

        Ok(DownloadTask {
            id: TaskId(row.id),
            owner: AccountId(row.owner_account_id),
            download_type: DownloadType::from_i32(row.download_type),
            url: row.url,
            status: Status::from_i32(row.status),
            metadata,
            error_message: row.error_message,
            retryable: row.retryable != 0,
            attempt: row.attempt,
            created_at: Utc
                .timestamp_opt(row.created_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
            updated_at: Utc
                .timestamp_opt(row.updated_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

/// Outbox record from database
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    /// Unique database ID
    pub id: i64,
    /// Topic name the consumer dispatches on
    pub topic: String,
    /// Serialized event body
    pub payload: String,
    /// Failed delivery attempts so far
    pub attempts: i64,
    /// Unix timestamp before which the row is invisible to consumers
    pub available_at: i64,
    /// Unix timestamp when the row was committed
    pub created_at: i64,
}

/// Database handle for download-tasks
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
