//! Durable artifact storage
//!
//! The execution pipeline writes each fetched artifact under a name derived from
//! its task id and the file-retrieval path reads it back. [`FileStore`] is the seam;
//! [`LocalFileStore`] keeps artifacts in a directory on the local filesystem.
//!
//! Writes go through a [`PendingFile`]: bytes land in a staging file and become
//! readable under their final name only once [`PendingFile::commit`] succeeds. A
//! pending file dropped without committing removes its staging file, so an aborted
//! download never leaves a partial artifact behind. Every open gets its own staging
//! file; two writers of the same name never share bytes, and the last commit wins.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::StorageError;
use crate::types::TaskId;

/// Staging suffix counter shared by every store in the process
static NEXT_STAGING: AtomicU64 = AtomicU64::new(0);

/// Readable artifact stream; the file handle is released on drop
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Storage name of the artifact fetched for a task
pub fn storage_name(id: TaskId) -> String {
    format!("download_file_{}", id)
}

/// An artifact being written
#[async_trait]
pub trait PendingFile: Send {
    /// Destination stream for the artifact bytes
    fn writer(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin);

    /// Flush and publish the artifact under its final name
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
}

/// Artifact storage backend
///
/// Implementations must be safe to share across executors. Concurrent writers of
/// one name must stay isolated from each other until they commit.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Start writing the artifact `name`, replacing any previous one on commit
    async fn open_for_write(&self, name: &str) -> Result<Box<dyn PendingFile>, StorageError>;

    /// Open the committed artifact `name` for reading
    async fn open_for_read(&self, name: &str) -> Result<FileReader, StorageError>;

    /// Delete the artifact `name`; a missing artifact is not an error
    async fn remove(&self, name: &str) -> Result<(), StorageError>;
}

/// Filesystem-backed [`FileStore`] rooted at one directory
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    /// Use `root` as the artifact directory, creating it if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| StorageError::Io {
                name: root.display().to_string(),
                source,
            })?;
        Ok(Self { root })
    }

    /// The artifact directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\'])
            && !name.contains("..");
        if !valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn open_for_write(&self, name: &str) -> Result<Box<dyn PendingFile>, StorageError> {
        let path = self.path_of(name)?;
        let seq = NEXT_STAGING.fetch_add(1, Ordering::Relaxed);
        let staging = self
            .root
            .join(format!(".{}.{}-{}.part", name, std::process::id(), seq));

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .await
            .map_err(|source| StorageError::Io {
                name: name.to_string(),
                source,
            })?;

        Ok(Box::new(LocalPendingFile {
            name: name.to_string(),
            file,
            staging,
            path,
            committed: false,
        }))
    }

    async fn open_for_read(&self, name: &str) -> Result<FileReader, StorageError> {
        let path = self.path_of(name)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(source) => Err(StorageError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }

    async fn remove(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path_of(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }
}

struct LocalPendingFile {
    name: String,
    file: tokio::fs::File,
    staging: PathBuf,
    path: PathBuf,
    committed: bool,
}

#[async_trait]
impl PendingFile for LocalPendingFile {
    fn writer(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin) {
        &mut self.file
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        let name = self.name.clone();
        let io_err = |source| StorageError::Io {
            name: name.clone(),
            source,
        };

        self.file.flush().await.map_err(io_err)?;
        self.file.sync_all().await.map_err(io_err)?;
        tokio::fs::rename(&self.staging, &self.path)
            .await
            .map_err(io_err)?;
        self.committed = true;

        tracing::debug!(name = %self.name, "artifact committed");
        Ok(())
    }
}

impl Drop for LocalPendingFile {
    fn drop(&mut self) {
        if !self.committed {
            // Best effort; the staging name is hidden from readers either way
            let _ = std::fs::remove_file(&self.staging);
        }
    }
}
