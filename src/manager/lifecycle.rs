//! Shutdown coordination and event subscription.

use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::types::Event;

use super::TaskManager;

/// How long shutdown waits for background loops to finish their current pass
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

impl TaskManager {
    /// Subscribe to pipeline events
    ///
    /// Each receiver sees every event sent after it subscribed. A receiver that
    /// falls more than 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Gracefully shut down
    ///
    /// 1. Stops accepting new tasks
    /// 2. Cancels the background loops
    /// 3. Waits (up to 30 seconds) for in-progress passes to finish, then aborts the rest
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// Tasks still `Downloading` afterwards are re-armed by the next recovery sweep.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.services.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new download tasks");

        self.services.cancel.cancel();

        let mut handles = std::mem::take(&mut *self.services.handles.lock().await);
        let wait_result = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            for handle in handles.iter_mut() {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "background service ended abnormally");
                }
            }
        })
        .await;

        match wait_result {
            Ok(()) => tracing::info!("All background services stopped"),
            Err(_) => {
                tracing::warn!("Timeout waiting for background services, aborting them");
                for handle in &handles {
                    handle.abort();
                }
            }
        }

        self.emit(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
