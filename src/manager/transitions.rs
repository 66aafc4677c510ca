//! Status transition engine.
//!
//! The claim is the only `Pending -> Downloading` edge and runs under the row lock.
//! Each claim bumps the task's `attempt`, and terminal writes name the attempt they
//! belong to. A write from an executor whose claim was re-armed by the recovery
//! sweep, re-claimed by another executor or deleted by the owner is discarded.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::storage::PendingFile;
use crate::types::{ClaimOutcome, Event, FILE_NAME_METADATA_KEY, Metadata, Status, TaskId};

use super::TaskManager;

impl TaskManager {
    /// Move a `Pending` task to `Downloading`, exclusively
    ///
    /// Returns the pre-claim snapshot and the attempt number owned by this caller
    /// when it won the claim, and [`ClaimOutcome::Skipped`] when the task is in any
    /// other status. An unknown id is [`Error::NotFound`]. Concurrent claimants of
    /// the same id serialize on the row lock; only the first sees `Pending`.
    pub async fn claim_task(&self, id: TaskId) -> Result<ClaimOutcome> {
        let mut tx = self.db.begin().await?;

        let Some(task) = Database::lock_task(&mut tx, id).await? else {
            tx.rollback().await?;
            tracing::warn!(task_id = id.0, "claim skipped: download task not found");
            return Err(Error::NotFound(id));
        };

        if task.status != Status::Pending {
            tx.rollback().await?;
            tracing::debug!(
                task_id = id.0,
                status = %task.status,
                "claim skipped: download task is not pending"
            );
            return Ok(ClaimOutcome::Skipped);
        }

        let mut claimed = task.clone();
        claimed.status = Status::Downloading;
        claimed.attempt += 1;
        Database::update_task(&mut tx, &claimed).await?;
        Database::commit(tx).await?;

        let attempt = claimed.attempt;
        tracing::info!(task_id = id.0, attempt, url = %task.url, "download task claimed");
        self.emit(Event::TaskClaimed { id });

        Ok(ClaimOutcome::Claimed { task, attempt })
    }

    /// `Downloading -> Success`: publish the staged artifact and record it
    ///
    /// Runs under the row lock. The artifact is committed only while the row is
    /// still `Downloading` under `attempt`; otherwise `pending` is dropped and its
    /// staged bytes never replace the artifact of a newer claim. A failed storage
    /// commit leaves the row untouched and is returned as [`Error::Storage`].
    pub(crate) async fn commit_success(
        &self,
        id: TaskId,
        attempt: i64,
        pending: Box<dyn PendingFile>,
        mut metadata: Metadata,
        file_name: &str,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let current = Database::lock_task(&mut tx, id)
            .await?
            .filter(|task| task.status == Status::Downloading && task.attempt == attempt);
        let Some(mut task) = current else {
            tx.rollback().await?;
            tracing::warn!(
                task_id = id.0,
                attempt,
                "discarded success: download task is no longer held by this claim"
            );
            return Ok(());
        };

        if let Err(e) = pending.commit().await {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(task_id = id.0, error = %rollback, "rollback after storage failure failed");
            }
            return Err(Error::Storage(e));
        }

        metadata.insert(FILE_NAME_METADATA_KEY.to_string(), file_name.into());
        task.status = Status::Success;
        task.metadata = metadata;
        task.error_message = None;
        task.retryable = true;
        Database::update_task(&mut tx, &task).await?;
        Database::commit(tx).await?;

        tracing::info!(task_id = id.0, attempt, file_name, "download task succeeded");
        self.emit(Event::TaskSucceeded {
            id,
            file_name: file_name.to_string(),
        });
        Ok(())
    }

    /// `Downloading -> Failed` for the claim numbered `attempt`
    ///
    /// `retryable` decides whether the recovery sweep re-arms the task.
    pub(crate) async fn mark_failed(
        &self,
        id: TaskId,
        attempt: i64,
        error: &Error,
        retryable: bool,
    ) -> Result<()> {
        let message = error.to_string();

        if self
            .db
            .finish_task(
                id,
                attempt,
                Status::Failed,
                &Metadata::new(),
                Some(&message),
                retryable,
            )
            .await?
        {
            self.emit(Event::TaskFailed {
                id,
                error: message,
                retryable,
            });
        } else {
            tracing::warn!(
                task_id = id.0,
                attempt,
                "discarded failure: download task is no longer held by this claim"
            );
        }
        Ok(())
    }
}
