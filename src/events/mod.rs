//! Creation event channel
//!
//! A transactional outbox in the task store. [`TaskCreatedProducer::publish`]
//! enqueues inside the transaction that inserts the task, so the event exists
//! exactly when the task does. [`EventConsumer`] leases due rows, hands each to the
//! [`EventHandler`] registered for its topic, deletes it on success and reschedules
//! it on failure. Delivery is at-least-once: a consumer that dies mid-batch lets
//! its lease expire and the rows are delivered again.

use async_trait::async_trait;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::EventsConfig;
use crate::db::{Database, EventRow};
use crate::error::{Error, Result};
use crate::manager::TaskManager;
use crate::types::TaskCreated;

/// Topic of [`TaskCreated`] events
pub const TASK_CREATED_TOPIC: &str = "download_task_created";

/// Publishes [`TaskCreated`] into the outbox
pub struct TaskCreatedProducer;

impl TaskCreatedProducer {
    /// Enqueue `event` in the caller's transaction
    pub async fn publish(conn: &mut SqliteConnection, event: &TaskCreated) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        Database::insert_event(conn, TASK_CREATED_TOPIC, &payload).await?;
        Ok(())
    }
}

/// Receives the payload of one delivered event
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process `payload`; an error asks for redelivery
    ///
    /// [`Error::Serialization`] marks the payload as undeliverable and the event
    /// is dropped instead of retried.
    async fn handle(&self, payload: &str) -> Result<()>;
}

/// Runs the execution pipeline for each created task
pub struct TaskCreatedHandler {
    manager: TaskManager,
}

impl TaskCreatedHandler {
    /// Handler driving `manager`
    pub fn new(manager: TaskManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EventHandler for TaskCreatedHandler {
    async fn handle(&self, payload: &str) -> Result<()> {
        let event: TaskCreated = serde_json::from_str(payload)?;
        tracing::debug!(task_id = event.id.0, "received task created event");
        self.manager.execute_task_with_deadline(event.id).await
    }
}

/// Polls the outbox and dispatches events by topic
pub struct EventConsumer {
    db: Arc<Database>,
    config: EventsConfig,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventConsumer {
    /// Consumer with no handlers registered
    pub fn new(db: Arc<Database>, config: EventsConfig) -> Self {
        Self {
            db,
            config,
            handlers: HashMap::new(),
        }
    }

    /// Route events of `topic` to `handler`
    pub fn register(&mut self, topic: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(topic.into(), handler);
    }

    /// Lease one batch and deliver it; returns the number of events leased
    ///
    /// A row whose ack or reschedule fails is logged and left to its lease; the
    /// rest of the batch is still delivered.
    pub async fn poll_once(&self) -> Result<usize> {
        let rows = self
            .db
            .lease_events(self.config.batch_size, self.config.lease)
            .await?;
        let leased = rows.len();

        for row in rows {
            let (event_id, topic) = (row.id, row.topic.clone());
            if let Err(e) = self.deliver(row).await {
                tracing::error!(
                    event_id,
                    topic = %topic,
                    error = %e,
                    "failed to settle event, redelivery after lease expiry"
                );
            }
        }

        Ok(leased)
    }

    async fn deliver(&self, row: EventRow) -> Result<()> {
        let Some(handler) = self.handlers.get(&row.topic) else {
            tracing::warn!(event_id = row.id, topic = %row.topic, "no handler for event topic");
            return self.retry_later(&row, "no handler registered").await;
        };

        match handler.handle(&row.payload).await {
            Ok(()) => {
                self.db.delete_event(row.id).await?;
                tracing::debug!(event_id = row.id, topic = %row.topic, "event delivered");
                Ok(())
            }
            Err(Error::Serialization(e)) => {
                tracing::error!(
                    event_id = row.id,
                    topic = %row.topic,
                    error = %e,
                    "dropping undecodable event"
                );
                self.db.delete_event(row.id).await
            }
            Err(e) => self.retry_later(&row, &e.to_string()).await,
        }
    }

    async fn retry_later(&self, row: &EventRow, reason: &str) -> Result<()> {
        let attempts = u32::try_from(row.attempts).unwrap_or(u32::MAX).saturating_add(1);

        if let Some(max) = self.config.max_attempts
            && attempts >= max
        {
            tracing::error!(
                event_id = row.id,
                topic = %row.topic,
                attempts,
                reason,
                "event exceeded delivery attempts, dropping"
            );
            return self.db.delete_event(row.id).await;
        }

        let delay = self.config.retry_delay.saturating_mul(attempts);
        tracing::warn!(
            event_id = row.id,
            topic = %row.topic,
            attempts,
            retry_in_secs = delay.as_secs(),
            reason,
            "event delivery failed, scheduling redelivery"
        );
        self.db.reschedule_event(row.id, delay).await
    }

    /// Poll until `cancel` fires
    ///
    /// A full batch is followed immediately by another poll; otherwise the loop
    /// sleeps for the poll interval.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            topics = ?self.handlers.keys().collect::<Vec<_>>(),
            "event consumer started"
        );

        let mut idle = Duration::ZERO;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(idle) => {}
            }

            idle = match self.poll_once().await {
                Ok(leased) if leased >= self.config.batch_size => Duration::ZERO,
                Ok(_) => self.config.poll_interval,
                Err(e) => {
                    tracing::error!(error = %e, "event consumer poll failed");
                    self.config.poll_interval
                }
            };
        }

        tracing::info!("event consumer stopped");
    }
}
