//! Configuration types for download-tasks
//!
//! The crate does not read files or environment variables itself; the embedding
//! application deserializes [`Config`] from whatever source it uses. Every field
//! has a default, so `Config::default()` is a working single-node setup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration for [`TaskManager`](crate::TaskManager)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Task store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Artifact storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP downloader settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Batch dispatcher settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Recovery sweep settings
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Creation event channel settings
    #[serde(default)]
    pub events: EventsConfig,
}

impl Config {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.concurrency_limit == 0 {
            return Err(Error::Config {
                message: "worker pool needs at least one worker".to_string(),
                key: Some("dispatcher.concurrency_limit".to_string()),
            });
        }
        if self.dispatcher.queue_capacity == 0 {
            return Err(Error::Config {
                message: "worker pool queue capacity must be positive".to_string(),
                key: Some("dispatcher.queue_capacity".to_string()),
            });
        }
        if self.events.batch_size == 0 {
            return Err(Error::Config {
                message: "event batch size must be positive".to_string(),
                key: Some("events.batch_size".to_string()),
            });
        }
        if self.events.lease.is_zero() {
            return Err(Error::Config {
                message: "event lease must be at least one second".to_string(),
                key: Some("events.lease".to_string()),
            });
        }
        Ok(())
    }
}

/// Task store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./download-tasks.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// How long a writer waits for the database lock before giving up (default: 30s)
    ///
    /// Bounds how long a claim blocks behind a concurrent claimant.
    #[serde(default = "default_busy_timeout", with = "duration_serde")]
    pub busy_timeout: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            busy_timeout: default_busy_timeout(),
        }
    }
}

/// Artifact storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding downloaded files (default: "./files")
    #[serde(default = "default_storage_root")]
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// HTTP downloader configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// TCP connect timeout (default: 10s)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Whole-request timeout including body transfer (default: none)
    #[serde(default, with = "optional_duration_serde")]
    pub request_timeout: Option<Duration>,

    /// User-Agent header
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Redirects followed before giving up (default: 10)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: None,
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
        }
    }
}

/// Batch dispatcher configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Run the periodic pending-task sweep (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time between sweeps (default: 60s)
    #[serde(default = "default_dispatch_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Worker pool size: tasks executing at once per sweep (default: 4)
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Jobs buffered ahead of the workers (default: 64)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Deadline for one task execution (default: none)
    ///
    /// An execution cut off by the deadline stays `Downloading` until the
    /// recovery sweep re-arms it.
    #[serde(default, with = "optional_duration_serde")]
    pub task_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_dispatch_interval(),
            concurrency_limit: default_concurrency_limit(),
            queue_capacity: default_queue_capacity(),
            task_timeout: None,
        }
    }
}

/// Recovery sweep configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Run the periodic stuck-task sweep (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time between sweeps (default: 300s)
    #[serde(default = "default_recovery_interval", with = "duration_serde")]
    pub interval: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_recovery_interval(),
        }
    }
}

/// Creation event channel configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Time between outbox polls when idle (default: 1s)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Events leased per poll (default: 32)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent consumer loops (default: 1, 0 disables the consumer)
    #[serde(default = "default_consumer_workers")]
    pub consumer_workers: usize,

    /// How long a leased event stays invisible to other consumers (default: 60s)
    #[serde(default = "default_lease", with = "duration_serde")]
    pub lease: Duration,

    /// Base redelivery delay after a handler error, multiplied by the attempt count (default: 5s)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,

    /// Drop an event after this many failed deliveries (default: never)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            batch_size: default_batch_size(),
            consumer_workers: default_consumer_workers(),
            lease: default_lease(),
            retry_delay: default_retry_delay(),
            max_attempts: None,
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./download-tasks.db")
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./files")
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    format!("download-tasks/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_redirects() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_dispatch_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_recovery_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_batch_size() -> usize {
    32
}

fn default_consumer_workers() -> usize {
    1
}

fn default_lease() -> Duration {
    Duration::from_secs(60)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
