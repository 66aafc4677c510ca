//! Outbox rows backing the creation event channel.

use std::time::Duration;

use sqlx::SqliteConnection;

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::{Database, EventRow};

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

impl Database {
    /// Enqueue an event inside the caller's transaction
    ///
    /// The row becomes visible to consumers only when that transaction commits.
    pub async fn insert_event(
        conn: &mut SqliteConnection,
        topic: &str,
        payload: &str,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO task_events (topic, payload, attempts, available_at, created_at)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(topic)
        .bind(payload)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert task event: {}",
                e
            )))
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Lease up to `limit` due events, oldest first
    ///
    /// Leased rows are hidden from other consumers for `lease`. A consumer that
    /// dies without acking lets them reappear afterwards.
    pub async fn lease_events(&self, limit: usize, lease: Duration) -> Result<Vec<EventRow>> {
        let now = chrono::Utc::now().timestamp();

        let mut rows = sqlx::query_as::<_, EventRow>(
            r#"
            UPDATE task_events
            SET available_at = ?
            WHERE id IN (
                SELECT id FROM task_events
                WHERE available_at <= ?
                ORDER BY id ASC
                LIMIT ?
            )
            RETURNING id, topic, payload, attempts, available_at, created_at
            "#,
        )
        .bind(now.saturating_add(secs(lease)))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to lease task events: {}",
                e
            )))
        })?;

        // RETURNING order is unspecified
        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }

    /// Acknowledge a delivered event
    pub async fn delete_event(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM task_events WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete task event: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Record a failed delivery and make the event due again after `delay`
    pub async fn reschedule_event(&self, id: i64, delay: Duration) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "UPDATE task_events SET attempts = attempts + 1, available_at = ? WHERE id = ?",
        )
        .bind(now.saturating_add(secs(delay)))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reschedule task event: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Number of undelivered events
    pub async fn count_events(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_events")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count task events: {}",
                    e
                )))
            })?;

        Ok(u64::try_from(count).unwrap_or(0))
    }
}
