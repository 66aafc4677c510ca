//! Shared test helpers for building TaskManager instances in tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::auth::StaticTokenResolver;
use crate::config::Config;
use crate::db::Database;
use crate::error::{DownloadError, Error, Result, StorageError};
use crate::fetcher::{Downloader, DownloaderRegistry};
use crate::manager::TaskManager;
use crate::storage::{FileReader, FileStore, LocalFileStore, PendingFile};
use crate::types::{AccountId, DownloadType, Metadata, Status, TaskId};

pub(crate) const ALICE: &str = "alice-token";
pub(crate) const BOB: &str = "bob-token";
pub(crate) const ALICE_ID: AccountId = AccountId(1);
pub(crate) const BOB_ID: AccountId = AccountId(2);

/// Downloader that writes a fixed body and records concurrency
pub(crate) struct InstrumentedDownloader {
    body: Vec<u8>,
    delay: Duration,
    running: AtomicUsize,
    high_water: AtomicUsize,
    calls: std::sync::Mutex<Vec<String>>,
}

impl InstrumentedDownloader {
    pub(crate) fn new(body: &[u8]) -> Self {
        Self::with_delay(body, Duration::ZERO)
    }

    pub(crate) fn with_delay(body: &[u8], delay: Duration) -> Self {
        Self {
            body: body.to_vec(),
            delay,
            running: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Highest number of downloads observed running at once
    pub(crate) fn high_water_mark(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    /// URLs downloaded, in call order
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Downloader for InstrumentedDownloader {
    async fn download(
        &self,
        url: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<Metadata> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        let written = dest.write_all(&self.body).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        written.map_err(|e| Error::Download(DownloadError::Write(e)))?;

        let mut metadata = Metadata::new();
        metadata.insert("size-bytes".to_string(), (self.body.len() as i64).into());
        Ok(metadata)
    }
}

/// Downloader whose first call writes its body and then holds until released
pub(crate) struct GatedDownloader {
    first_body: Vec<u8>,
    later_body: Vec<u8>,
    calls: AtomicUsize,
    /// Signalled once the first call has written its body
    pub(crate) started: tokio::sync::Notify,
    /// Lets the first call return
    pub(crate) release: tokio::sync::Notify,
}

impl GatedDownloader {
    pub(crate) fn new(first_body: &[u8], later_body: &[u8]) -> Self {
        Self {
            first_body: first_body.to_vec(),
            later_body: later_body.to_vec(),
            calls: AtomicUsize::new(0),
            started: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        }
    }
}

#[async_trait]
impl Downloader for GatedDownloader {
    async fn download(
        &self,
        _url: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<Metadata> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            dest.write_all(&self.first_body).await.unwrap();
            self.started.notify_one();
            self.release.notified().await;
        } else {
            dest.write_all(&self.later_body).await.unwrap();
        }
        Ok(Metadata::new())
    }
}

/// Downloader that writes a few bytes and then fails
pub(crate) struct FailingDownloader;

#[async_trait]
impl Downloader for FailingDownloader {
    async fn download(
        &self,
        url: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<Metadata> {
        dest.write_all(b"partial").await.unwrap();
        Err(Error::Download(DownloadError::HttpStatus {
            status: 503,
            url: url.to_string(),
        }))
    }
}

/// Local store that counts writes and can refuse them
pub(crate) struct CountingStore {
    inner: LocalFileStore,
    writes: AtomicUsize,
    refuse_writes: bool,
}

impl CountingStore {
    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileStore for CountingStore {
    async fn open_for_write(
        &self,
        name: &str,
    ) -> std::result::Result<Box<dyn PendingFile>, StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.refuse_writes {
            return Err(StorageError::Io {
                name: name.to_string(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.open_for_write(name).await
    }

    async fn open_for_read(&self, name: &str) -> std::result::Result<FileReader, StorageError> {
        self.inner.open_for_read(name).await
    }

    async fn remove(&self, name: &str) -> std::result::Result<(), StorageError> {
        self.inner.remove(name).await
    }
}

/// A manager over throwaway storage; keep it alive for the duration of the test
pub(crate) struct Harness {
    pub(crate) manager: TaskManager,
    pub(crate) store: Arc<CountingStore>,
    pub(crate) _temp_dir: tempfile::TempDir,
}

pub(crate) struct HarnessBuilder {
    config: Config,
    downloader: Option<Arc<dyn Downloader>>,
    refuse_writes: bool,
}

impl HarnessBuilder {
    pub(crate) fn downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub(crate) fn refuse_writes(mut self) -> Self {
        self.refuse_writes = true;
        self
    }

    pub(crate) fn config(mut self, edit: impl FnOnce(&mut Config)) -> Self {
        edit(&mut self.config);
        self
    }

    pub(crate) async fn build(self) -> Harness {
        let temp_dir = tempfile::tempdir().unwrap();

        let mut config = self.config;
        config.persistence.database_path = temp_dir.path().join("tasks.db");
        config.storage.root_dir = temp_dir.path().join("files");

        let db = Database::from_config(&config.persistence).await.unwrap();
        let store = Arc::new(CountingStore {
            inner: LocalFileStore::new(&config.storage.root_dir).await.unwrap(),
            writes: AtomicUsize::new(0),
            refuse_writes: self.refuse_writes,
        });

        let mut downloaders = DownloaderRegistry::new();
        if let Some(downloader) = self.downloader {
            downloaders.register(DownloadType::Http, downloader);
        }

        let resolver = StaticTokenResolver::new()
            .with_token(ALICE, ALICE_ID)
            .with_token(BOB, BOB_ID);

        let manager = TaskManager::with_components(
            config,
            Arc::new(db),
            store.clone(),
            downloaders,
            Arc::new(resolver),
        )
        .unwrap();

        Harness {
            manager,
            store,
            _temp_dir: temp_dir,
        }
    }
}

/// Start building a harness; background services are never started implicitly
pub(crate) fn harness() -> HarnessBuilder {
    let mut config = Config::default();
    config.dispatcher.concurrency_limit = 3;
    config.events.poll_interval = Duration::from_millis(20);
    config.events.retry_delay = Duration::ZERO;

    HarnessBuilder {
        config,
        downloader: None,
        refuse_writes: false,
    }
}

impl Harness {
    /// Create a task for alice
    pub(crate) async fn create(&self, url: &str) -> TaskId {
        self.manager
            .create_task(ALICE, DownloadType::Http, url)
            .await
            .unwrap()
            .id
    }

    /// Current status straight from the store
    pub(crate) async fn status(&self, id: TaskId) -> Status {
        self.manager.db.get_task(id).await.unwrap().unwrap().status
    }

    /// Overwrite a task's status without going through the pipeline
    pub(crate) async fn force_status(&self, id: TaskId, status: Status) {
        let mut tx = self.manager.db.begin().await.unwrap();
        let mut task = Database::lock_task(&mut tx, id).await.unwrap().unwrap();
        task.status = status;
        Database::update_task(&mut tx, &task).await.unwrap();
        Database::commit(tx).await.unwrap();
    }
}
