//! Background service starters: dispatcher, recovery sweep and event consumers.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::events::{EventConsumer, TASK_CREATED_TOPIC, TaskCreatedHandler};

use super::TaskManager;

impl TaskManager {
    /// Spawn the configured background loops
    ///
    /// Starts the periodic dispatcher, the periodic recovery sweep and
    /// `events.consumer_workers` event consumers. All of them stop on
    /// [`shutdown`](Self::shutdown). Calling this twice is a no-op.
    pub async fn start_services(&self) -> Result<()> {
        if !self.services.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if self.services.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("background services already started");
            return Ok(());
        }

        let mut handles = self.services.handles.lock().await;

        let dispatcher = &self.config.dispatcher;
        if dispatcher.enabled {
            let manager = self.clone();
            handles.push(self.spawn_periodic("dispatcher", dispatcher.interval, move || {
                let manager = manager.clone();
                async move {
                    if let Err(e) = manager.execute_all_pending().await {
                        tracing::error!(error = %e, "pending download task dispatch failed");
                    }
                }
            }));
        } else {
            tracing::info!("Dispatcher disabled, skipping pending task sweep");
        }

        let recovery = &self.config.recovery;
        if recovery.enabled {
            let manager = self.clone();
            handles.push(self.spawn_periodic("recovery", recovery.interval, move || {
                let manager = manager.clone();
                async move {
                    if let Err(e) = manager.reclaim_stuck_tasks().await {
                        tracing::error!(error = %e, "recovery sweep failed");
                    }
                }
            }));
        } else {
            tracing::info!("Recovery sweep disabled");
        }

        for worker in 0..self.config.events.consumer_workers {
            handles.push(self.spawn_event_consumer(worker));
        }

        tracing::info!(loops = handles.len(), "background services started");
        Ok(())
    }

    /// Run `tick` every `period` (first run immediately) until shutdown
    fn spawn_periodic<F, Fut>(
        &self,
        name: &'static str,
        period: Duration,
        mut tick: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.services.cancel.child_token();

        tokio::spawn(async move {
            tracing::info!(service = name, period_secs = period.as_secs(), "service started");

            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                // A running pass finishes before cancellation is observed
                tick().await;
            }

            tracing::info!(service = name, "service stopped");
        })
    }

    fn spawn_event_consumer(&self, worker: usize) -> tokio::task::JoinHandle<()> {
        let mut consumer = EventConsumer::new(Arc::clone(&self.db), self.config.events.clone());
        consumer.register(
            TASK_CREATED_TOPIC,
            Arc::new(TaskCreatedHandler::new(self.clone())),
        );
        let cancel = self.services.cancel.child_token();

        tokio::spawn(async move {
            tracing::debug!(worker, "event consumer worker spawned");
            consumer.run(cancel).await;
        })
    }
}
