//! Task manager implementation split into focused submodules.
//!
//! The `TaskManager` struct and its methods are organized by domain:
//! - [`tasks`] - Owner-facing create/list/update/delete/file operations
//! - [`transitions`] - Status transition engine (claim, terminal writes)
//! - [`execution`] - Execution orchestrator for a single task
//! - [`dispatcher`] - Batch dispatch of every pending task
//! - [`recovery`] - Recovery sweep of stuck tasks
//! - [`services`] - Background loop starters
//! - [`lifecycle`] - Shutdown coordination and event subscription

mod dispatcher;
mod execution;
mod lifecycle;
mod recovery;
mod services;
mod tasks;
mod transitions;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio_util::sync::CancellationToken;

use crate::auth::TokenResolver;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::fetcher::DownloaderRegistry;
use crate::storage::{FileStore, LocalFileStore};
use crate::types::Event;

/// Background service bookkeeping
#[derive(Clone)]
pub(crate) struct ServiceState {
    /// Cleared by shutdown; creation is refused afterwards
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Set once background loops have been spawned
    pub(crate) started: Arc<AtomicBool>,
    /// Parent token of every background loop
    pub(crate) cancel: CancellationToken,
    /// Handles of the spawned loops, drained by shutdown
    pub(crate) handles: Arc<tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl ServiceState {
    fn new() -> Self {
        Self {
            accepting_new: Arc::new(AtomicBool::new(true)),
            started: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            handles: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

/// Download task pipeline (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct TaskManager {
    /// Task store (public for integration tests to inspect rows)
    pub db: Arc<Database>,
    /// Artifact storage
    pub(crate) store: Arc<dyn FileStore>,
    /// Downloader strategies by download type
    pub(crate) downloaders: Arc<DownloaderRegistry>,
    /// Caller token resolution
    pub(crate) resolver: Arc<dyn TokenResolver>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Background loops and shutdown state
    pub(crate) services: ServiceState,
}

impl TaskManager {
    /// Build a manager with the built-in components
    ///
    /// Opens (and migrates) the SQLite store, creates the artifact directory and
    /// registers the HTTP downloader. Background loops are not started; call
    /// [`start_services`](Self::start_services).
    pub async fn new(config: Config, resolver: Arc<dyn TokenResolver>) -> Result<Self> {
        config.validate()?;

        let db = Database::from_config(&config.persistence).await?;
        let store = LocalFileStore::new(&config.storage.root_dir).await?;
        let downloaders = DownloaderRegistry::with_http(&config.http)?;

        Self::with_components(
            config,
            Arc::new(db),
            Arc::new(store),
            downloaders,
            resolver,
        )
    }

    /// Build a manager from caller-supplied components
    pub fn with_components(
        config: Config,
        db: Arc<Database>,
        store: Arc<dyn FileStore>,
        downloaders: DownloaderRegistry,
        resolver: Arc<dyn TokenResolver>,
    ) -> Result<Self> {
        config.validate()?;

        // Buffer lets slow subscribers lag without blocking the pipeline
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        Ok(Self {
            db,
            store,
            downloaders: Arc::new(downloaders),
            resolver,
            config: Arc::new(config),
            event_tx,
            services: ServiceState::new(),
        })
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
