//! Owner-facing task operations.
//!
//! Every call authenticates its token first. Mutations lock the row, then check
//! ownership, then status, and only then write; a failed check rolls back without
//! touching the row.

use std::sync::atomic::Ordering;

use crate::db::{Database, NewTask};
use crate::error::{Error, Result};
use crate::events::TaskCreatedProducer;
use crate::storage::{FileReader, storage_name};
use crate::types::{
    AccountId, DownloadTask, DownloadType, Event, Status, TaskCreated, TaskId, TaskPage,
};

use super::TaskManager;

fn validate_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(Error::InvalidInput("url must not be empty".to_string()));
    }
    url::Url::parse(url)
        .map(|_| ())
        .map_err(|e| Error::InvalidInput(format!("invalid url '{}': {}", url, e)))
}

fn validate_download_type(download_type: DownloadType) -> Result<()> {
    // The stored code must read back as the same type
    if DownloadType::from_i32(download_type.to_i32()) != download_type {
        return Err(Error::InvalidInput(format!(
            "download type code {} is reserved",
            download_type.to_i32()
        )));
    }
    Ok(())
}

fn ensure_owner(task: &DownloadTask, account: AccountId, operation: &'static str) -> Result<()> {
    if task.owner != account {
        tracing::warn!(
            task_id = task.id.0,
            account_id = account.0,
            operation,
            "rejected operation on download task owned by another account"
        );
        return Err(Error::PermissionDenied {
            id: task.id,
            operation,
        });
    }
    Ok(())
}

impl TaskManager {
    /// Create a `Pending` task owned by the caller and publish its creation event
    ///
    /// The row and the event are committed together; if either write fails,
    /// neither exists.
    pub async fn create_task(
        &self,
        token: &str,
        download_type: DownloadType,
        url: &str,
    ) -> Result<DownloadTask> {
        if !self.services.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let owner = self.resolver.resolve(token).await?;
        validate_download_type(download_type)?;
        validate_url(url)?;

        let mut tx = self.db.begin().await?;
        let task = Database::insert_task(
            &mut tx,
            &NewTask {
                owner,
                download_type,
                url: url.to_string(),
            },
        )
        .await?;
        TaskCreatedProducer::publish(&mut tx, &TaskCreated { id: task.id }).await?;
        Database::commit(tx).await?;

        tracing::info!(
            task_id = task.id.0,
            account_id = owner.0,
            url,
            "download task created"
        );
        self.emit(Event::TaskCreated { id: task.id });

        Ok(task)
    }

    /// One of the caller's tasks
    pub async fn get_task(&self, token: &str, id: TaskId) -> Result<DownloadTask> {
        let account = self.resolver.resolve(token).await?;
        let task = self.db.get_task(id).await?.ok_or(Error::NotFound(id))?;
        ensure_owner(&task, account, "read")?;
        Ok(task)
    }

    /// A page of the caller's tasks, ordered by id, plus their total count
    pub async fn list_tasks(&self, token: &str, offset: u64, limit: u64) -> Result<TaskPage> {
        let account = self.resolver.resolve(token).await?;

        let total = self.db.count_tasks_of_account(account).await?;
        let tasks = self
            .db
            .list_tasks_of_account(account, offset, limit)
            .await?;

        Ok(TaskPage { total, tasks })
    }

    /// Point a not-yet-finished task at a new URL
    ///
    /// Allowed while the task is `Pending` or `Downloading`; a finished task is
    /// [`Error::InvalidState`]. An in-flight download keeps using the URL it
    /// started with.
    pub async fn update_task_url(&self, token: &str, id: TaskId, url: &str) -> Result<DownloadTask> {
        let account = self.resolver.resolve(token).await?;
        validate_url(url)?;

        let mut tx = self.db.begin().await?;
        let Some(mut task) = Database::lock_task(&mut tx, id).await? else {
            tx.rollback().await?;
            return Err(Error::NotFound(id));
        };

        if let Err(e) = ensure_owner(&task, account, "update") {
            tx.rollback().await?;
            return Err(e);
        }

        if task.status.is_terminal() {
            tx.rollback().await?;
            return Err(Error::InvalidState {
                id,
                operation: "update",
                status: task.status,
            });
        }

        task.url = url.to_string();
        Database::update_task(&mut tx, &task).await?;
        Database::commit(tx).await?;

        tracing::info!(task_id = id.0, url, "download task url updated");

        self.db.get_task(id).await?.ok_or(Error::NotFound(id))
    }

    /// Delete one of the caller's tasks and, best effort, its stored file
    pub async fn delete_task(&self, token: &str, id: TaskId) -> Result<()> {
        let account = self.resolver.resolve(token).await?;

        let mut tx = self.db.begin().await?;
        let Some(task) = Database::lock_task(&mut tx, id).await? else {
            tx.rollback().await?;
            return Err(Error::NotFound(id));
        };

        if let Err(e) = ensure_owner(&task, account, "delete") {
            tx.rollback().await?;
            return Err(e);
        }

        Database::delete_task(&mut tx, id).await?;
        Database::commit(tx).await?;

        if let Err(e) = self.store.remove(&storage_name(id)).await {
            tracing::warn!(task_id = id.0, error = %e, "failed to remove stored file of deleted task");
        }

        tracing::info!(task_id = id.0, status = %task.status, "download task deleted");
        self.emit(Event::TaskDeleted { id });

        Ok(())
    }

    /// Open the stored file of one of the caller's successful tasks
    pub async fn get_task_file(&self, token: &str, id: TaskId) -> Result<FileReader> {
        let account = self.resolver.resolve(token).await?;
        let task = self.db.get_task(id).await?.ok_or(Error::NotFound(id))?;
        ensure_owner(&task, account, "read file of")?;

        if task.status != Status::Success {
            return Err(Error::InvalidState {
                id,
                operation: "read file of",
                status: task.status,
            });
        }

        let Some(file_name) = task.file_name() else {
            tracing::error!(task_id = id.0, "successful download task has no file name");
            return Err(Error::Other(format!(
                "download task {} has no stored file name",
                id
            )));
        };

        Ok(self.store.open_for_read(file_name).await?)
    }
}
