//! # download-tasks
//!
//! Multi-tenant pipeline for URL download tasks backed by SQLite.
//!
//! Accounts create tasks naming a URL. The pipeline claims each pending task
//! exactly once, streams the body into artifact storage and records the outcome.
//! Three paths drive execution:
//!
//! - a creation event published in the same transaction as the task row and
//!   delivered at least once to [`events::TaskCreatedHandler`]
//! - a periodic dispatcher running every pending task through a bounded worker pool
//! - a periodic recovery sweep re-arming tasks stuck in `Downloading` or failed
//!   with a retryable error
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use download_tasks::{AccountId, Config, DownloadType, StaticTokenResolver, TaskManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = StaticTokenResolver::new().with_token("secret", AccountId(1));
//!     let manager = TaskManager::new(Config::default(), Arc::new(resolver)).await?;
//!     manager.start_services().await?;
//!
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let task = manager
//!         .create_task("secret", DownloadType::Http, "https://example.com/file.bin")
//!         .await?;
//!     println!("created task {}", task.id);
//!
//!     download_tasks::run_with_shutdown(manager).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Caller token resolution
pub mod auth;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Creation event channel (transactional outbox)
pub mod events;
/// Downloader strategies
pub mod fetcher;
/// Task pipeline (decomposed into focused submodules)
pub mod manager;
/// Artifact storage
pub mod storage;
/// Core types and events
pub mod types;
/// Bounded worker pool
pub mod worker_pool;

// Re-export commonly used types
pub use auth::{StaticTokenResolver, TokenResolver};
pub use config::Config;
pub use db::Database;
pub use error::{DatabaseError, DownloadError, Error, Result, StorageError};
pub use fetcher::{Downloader, DownloaderRegistry, HttpDownloader};
pub use manager::TaskManager;
pub use storage::{FileStore, LocalFileStore};
pub use types::{
    AccountId, ClaimOutcome, DownloadTask, DownloadType, Event, FILE_NAME_METADATA_KEY, Metadata,
    MetadataValue, Status, TaskCreated, TaskId, TaskPage,
};

/// Run the pipeline until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Background loops must already be running; see [`TaskManager::start_services`].
pub async fn run_with_shutdown(manager: TaskManager) -> Result<()> {
    wait_for_signal().await;
    manager.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "SIGINT handler unavailable, waiting for SIGTERM");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT");
            sigint.recv().await;
            tracing::info!("Received SIGINT");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "No signal handlers available, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
}
