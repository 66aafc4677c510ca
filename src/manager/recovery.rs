//! Recovery sweep.

use crate::error::Result;
use crate::types::Event;

use super::TaskManager;

impl TaskManager {
    /// Reset stuck tasks to `Pending` so the next dispatch picks them up
    ///
    /// Covers every `Downloading` task (its executor may have died) and every
    /// retryable `Failed` task, in one bulk statement. Returns the number reset.
    pub async fn reclaim_stuck_tasks(&self) -> Result<u64> {
        let count = self.db.reset_stuck_tasks_to_pending().await?;

        if count > 0 {
            tracing::info!(count, "reset stuck download tasks to pending");
            self.emit(Event::TasksReclaimed { count });
        } else {
            tracing::debug!("no stuck download tasks");
        }

        Ok(count)
    }
}
