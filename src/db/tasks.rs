//! Download task rows: inserts, row locks, guarded transitions and bulk recovery.

use sqlx::SqliteConnection;

use crate::error::DatabaseError;
use crate::types::{AccountId, DownloadTask, Metadata, Status, TaskId};
use crate::{Error, Result};

use super::{Database, NewTask, TaskRow};

const TASK_COLUMNS: &str = "id, owner_account_id, download_type, url, status, metadata, \
                            error_message, retryable, attempt, created_at, updated_at";

fn into_task(row: TaskRow) -> Result<DownloadTask> {
    DownloadTask::try_from(row).map_err(Error::Database)
}

impl Database {
    /// Insert a new `Pending` task inside the caller's transaction
    pub async fn insert_task(conn: &mut SqliteConnection, task: &NewTask) -> Result<DownloadTask> {
        let now = chrono::Utc::now().timestamp();

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            INSERT INTO download_tasks (
                owner_account_id, download_type, url, status,
                metadata, error_message, retryable, created_at, updated_at
            ) VALUES (?, ?, ?, ?, '{{}}', NULL, 1, ?, ?)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task.owner)
        .bind(task.download_type.to_i32())
        .bind(&task.url)
        .bind(Status::Pending.to_i32())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert download task: {}",
                e
            )))
        })?;

        into_task(row)
    }

    /// Read a task and take the store's write lock until the transaction ends
    ///
    /// The no-op UPDATE is the first statement of the transaction, so SQLite
    /// acquires its write lock before the row is returned. Another transaction
    /// calling this waits on the busy timeout until the holder commits or rolls
    /// back, then sees the committed row. Returns `None` for an unknown id; the
    /// lock is still held in that case.
    pub async fn lock_task(conn: &mut SqliteConnection, id: TaskId) -> Result<Option<DownloadTask>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE download_tasks SET updated_at = updated_at WHERE id = ? RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to lock download task: {}",
                e
            )))
        })?;

        row.map(into_task).transpose()
    }

    /// Overwrite every mutable column of a locked task
    pub async fn update_task(conn: &mut SqliteConnection, task: &DownloadTask) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let metadata = serde_json::to_string(&task.metadata)?;

        sqlx::query(
            r#"
            UPDATE download_tasks
            SET url = ?, status = ?, metadata = ?, error_message = ?, retryable = ?, attempt = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&task.url)
        .bind(task.status.to_i32())
        .bind(metadata)
        .bind(&task.error_message)
        .bind(i32::from(task.retryable))
        .bind(task.attempt)
        .bind(now)
        .bind(task.id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update download task: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Delete a locked task row
    pub async fn delete_task(conn: &mut SqliteConnection, id: TaskId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM download_tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete download task: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Get a task by ID without locking
    pub async fn get_task(&self, id: TaskId) -> Result<Option<DownloadTask>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM download_tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get download task: {}",
                e
            )))
        })?;

        row.map(into_task).transpose()
    }

    /// Snapshot of every `Pending` task id, oldest first
    pub async fn list_pending_task_ids(&self) -> Result<Vec<TaskId>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM download_tasks WHERE status = ? ORDER BY id ASC")
                .bind(Status::Pending.to_i32())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to list pending download tasks: {}",
                        e
                    )))
                })?;

        Ok(ids.into_iter().map(TaskId).collect())
    }

    /// Write a terminal status for the claim numbered `attempt`
    ///
    /// Applies only while the row is still `Downloading` under that same claim.
    /// Returns `false` when the row was re-armed, re-claimed or deleted in the
    /// meantime and the write was discarded.
    pub async fn finish_task(
        &self,
        id: TaskId,
        attempt: i64,
        status: Status,
        metadata: &Metadata,
        error_message: Option<&str>,
        retryable: bool,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let metadata = serde_json::to_string(metadata)?;

        let result = sqlx::query(
            r#"
            UPDATE download_tasks
            SET status = ?, metadata = ?, error_message = ?, retryable = ?, updated_at = ?
            WHERE id = ? AND status = ? AND attempt = ?
            "#,
        )
        .bind(status.to_i32())
        .bind(metadata)
        .bind(error_message)
        .bind(i32::from(retryable))
        .bind(now)
        .bind(id)
        .bind(Status::Downloading.to_i32())
        .bind(attempt)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to finish download task: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Reset every `Downloading` task and every retryable `Failed` task to `Pending`
    ///
    /// One statement, no per-row locks. `Success` rows and permanent failures are
    /// never touched. Returns the number of rows reset.
    pub async fn reset_stuck_tasks_to_pending(&self) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE download_tasks
            SET status = ?, error_message = NULL, updated_at = ?
            WHERE status = ? OR (status = ? AND retryable = 1)
            "#,
        )
        .bind(Status::Pending.to_i32())
        .bind(now)
        .bind(Status::Downloading.to_i32())
        .bind(Status::Failed.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reset stuck download tasks: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// One page of an account's tasks ordered by id
    pub async fn list_tasks_of_account(
        &self,
        owner: AccountId,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<DownloadTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM download_tasks
            WHERE owner_account_id = ?
            ORDER BY id ASC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(owner)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list download tasks: {}",
                e
            )))
        })?;

        rows.into_iter().map(into_task).collect()
    }

    /// Number of tasks owned by an account
    pub async fn count_tasks_of_account(&self, owner: AccountId) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM download_tasks WHERE owner_account_id = ?")
                .bind(owner)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count download tasks: {}",
                        e
                    )))
                })?;

        Ok(u64::try_from(count).unwrap_or(0))
    }
}
