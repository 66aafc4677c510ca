//! Batch dispatcher: run every pending task through a bounded worker pool.

use crate::error::Result;
use crate::worker_pool::WorkerPool;

use super::TaskManager;

impl TaskManager {
    /// Execute all currently pending tasks, at most `dispatcher.concurrency_limit` at once
    ///
    /// Returns once every submitted task has finished. Per-task failures are
    /// logged and never fail the batch.
    pub async fn execute_all_pending(&self) -> Result<()> {
        let ids = self.db.list_pending_task_ids().await?;
        if ids.is_empty() {
            tracing::debug!("no pending download tasks");
            return Ok(());
        }

        let dispatcher = &self.config.dispatcher;
        tracing::info!(
            count = ids.len(),
            concurrency = dispatcher.concurrency_limit,
            "dispatching pending download tasks"
        );

        let pool = WorkerPool::new(dispatcher.concurrency_limit, dispatcher.queue_capacity);
        for id in ids {
            let manager = self.clone();
            pool.submit(async move {
                if let Err(e) = manager.execute_task_with_deadline(id).await {
                    tracing::error!(task_id = id.0, error = %e, "download task execution failed");
                }
            })
            .await?;
        }
        pool.drain().await;

        tracing::debug!("pending download task batch finished");
        Ok(())
    }
}
