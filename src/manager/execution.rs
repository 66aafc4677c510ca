//! Execution orchestrator: one task from claim to terminal status.

use crate::error::{Error, Result};
use crate::storage::storage_name;
use crate::types::{ClaimOutcome, TaskId};

use super::TaskManager;

impl TaskManager {
    /// Claim, fetch and store one task
    ///
    /// Returns `Ok(())` without doing anything when the task is unknown or not
    /// pending, so repeated deliveries of the same id are harmless. An unsupported
    /// download type fails the task permanently and is not an error. Storage and
    /// download failures mark the task `Failed` (re-armed later by the recovery
    /// sweep) and are returned to the caller.
    pub async fn execute_task(&self, id: TaskId) -> Result<()> {
        let (task, attempt) = match self.claim_task(id).await {
            Ok(ClaimOutcome::Claimed { task, attempt }) => (task, attempt),
            Ok(ClaimOutcome::Skipped) => return Ok(()),
            Err(Error::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let Some(downloader) = self.downloaders.get(task.download_type) else {
            let err = Error::UnsupportedType(task.download_type.to_i32());
            tracing::warn!(task_id = id.0, error = %err, "failing download task permanently");
            self.mark_failed(id, attempt, &err, false).await?;
            return Ok(());
        };

        let name = storage_name(id);
        let mut pending = match self.store.open_for_write(&name).await {
            Ok(pending) => pending,
            Err(e) => {
                let err = Error::Storage(e);
                tracing::error!(task_id = id.0, error = %err, "failed to open storage for download task");
                self.record_failure(id, attempt, &err).await;
                return Err(err);
            }
        };

        let downloaded = downloader.download(&task.url, pending.writer()).await;
        let metadata = match downloaded {
            Ok(metadata) => metadata,
            Err(err) => {
                // Discards the partial artifact
                drop(pending);
                tracing::error!(task_id = id.0, url = %task.url, error = %err, "download failed");
                self.record_failure(id, attempt, &err).await;
                return Err(err);
            }
        };

        match self
            .commit_success(id, attempt, pending, metadata, &name)
            .await
        {
            Err(err @ Error::Storage(_)) => {
                tracing::error!(task_id = id.0, error = %err, "failed to store downloaded file");
                self.record_failure(id, attempt, &err).await;
                Err(err)
            }
            other => other,
        }
    }

    /// Mark a retryable failure, keeping `err` as the caller's result
    async fn record_failure(&self, id: TaskId, attempt: i64, err: &Error) {
        if let Err(e) = self.mark_failed(id, attempt, err, true).await {
            tracing::error!(
                task_id = id.0,
                attempt,
                error = %e,
                cause = %err,
                "failed to record download task failure, leaving it for the recovery sweep"
            );
        }
    }

    /// [`execute_task`](Self::execute_task) bounded by `dispatcher.task_timeout`
    ///
    /// When the deadline passes mid-download the task is left `Downloading` for
    /// the recovery sweep and `Ok(())` is returned.
    pub async fn execute_task_with_deadline(&self, id: TaskId) -> Result<()> {
        let Some(limit) = self.config.dispatcher.task_timeout else {
            return self.execute_task(id).await;
        };

        match tokio::time::timeout(limit, self.execute_task(id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    task_id = id.0,
                    timeout_secs = limit.as_secs(),
                    "download task deadline elapsed, leaving it for the recovery sweep"
                );
                Ok(())
            }
        }
    }
}
