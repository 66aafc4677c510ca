//! Error types for download-tasks
//!
//! The taxonomy mirrors how the pipeline reacts to a failure:
//! - [`Error::NotFound`] and [`Error::PermissionDenied`] are surfaced to the caller
//!   and never mutate state
//! - [`Error::UnsupportedType`] ends an attempt as a permanent `Failed`
//! - storage, download and network failures are transient: the attempt ends
//!   `Failed` and the recovery sweep re-arms it
//!
//! Losing a claim race is not an error; see [`ClaimOutcome`](crate::types::ClaimOutcome).

use crate::types::{Status, TaskId};
use thiserror::Error;

/// Result type alias for download-tasks operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for download-tasks
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "dispatcher.concurrency_limit")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Task id unknown to the store
    #[error("download task {0} not found")]
    NotFound(TaskId),

    /// The caller's account does not own the task
    #[error("permission denied: cannot {operation} download task {id} owned by another account")]
    PermissionDenied {
        /// The task the caller tried to touch
        id: TaskId,
        /// The attempted operation (e.g., "update", "delete")
        operation: &'static str,
    },

    /// Token could not be resolved to an account
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Operation not allowed in the task's current status
    #[error("cannot {operation} download task {id} in status {status}")]
    InvalidState {
        /// The task id
        id: TaskId,
        /// The attempted operation
        operation: &'static str,
        /// The status that prevents it
        status: Status,
    },

    /// Caller-supplied value rejected
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No downloader exists for the task's download type
    #[error("unsupported download type: {0}")]
    UnsupportedType(i32),

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Downloader failure
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new download tasks")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a later attempt might succeed
    ///
    /// Transient failures leave the task `Failed` but eligible for the recovery sweep.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Download(_) | Error::Io(_) | Error::Network(_)
        )
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored value could not be decoded
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Storage backend errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Name would escape the storage root or is empty
    #[error("invalid storage name {0:?}")]
    InvalidName(String),

    /// No object with this name
    #[error("storage object {0:?} not found")]
    NotFound(String),

    /// Underlying filesystem failure
    #[error("storage I/O error on {name:?}: {source}")]
    Io {
        /// Storage name involved
        name: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Downloader errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Request could not be sent or the body could not be read
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Remote answered with a non-success status
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// Status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Connect or request timeout
    #[error("connection timeout")]
    Timeout,

    /// URL rejected before any request was made
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Writing to the destination stream failed
    #[error("failed to write downloaded bytes: {0}")]
    Write(#[source] std::io::Error),
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Download(DownloadError::Timeout).is_transient());
        assert!(Error::Storage(StorageError::InvalidName(String::new())).is_transient());
        assert!(!Error::UnsupportedType(5).is_transient());
        assert!(!Error::NotFound(TaskId(1)).is_transient());
        assert!(
            !Error::PermissionDenied {
                id: TaskId(1),
                operation: "delete"
            }
            .is_transient()
        );
    }

    #[test]
    fn messages_name_the_task() {
        let err = Error::PermissionDenied {
            id: TaskId(7),
            operation: "update",
        };
        assert_eq!(
            err.to_string(),
            "permission denied: cannot update download task 7 owned by another account"
        );

        let err = Error::InvalidState {
            id: TaskId(3),
            operation: "fetch file of",
            status: Status::Pending,
        };
        assert_eq!(
            err.to_string(),
            "cannot fetch file of download task 3 in status pending"
        );
    }
}
