use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::db::{Database, NewTask};
use crate::error::{DownloadError, Error};
use crate::manager::test_helpers::{
    ALICE, ALICE_ID, FailingDownloader, GatedDownloader, InstrumentedDownloader, harness,
};
use crate::storage::{FileStore, storage_name};
use crate::types::{DownloadType, Event, FILE_NAME_METADATA_KEY, MetadataValue, Status, TaskId};

#[tokio::test]
async fn test_successful_execution_stores_file() {
    let downloader = Arc::new(InstrumentedDownloader::new(b"file contents"));
    let h = harness().downloader(downloader.clone()).build().await;
    let id = h.create("https://example.com/file.txt").await;
    let mut events = h.manager.subscribe();

    h.manager.execute_task(id).await.unwrap();

    let task = h.manager.db.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, Status::Success);
    assert_eq!(task.file_name(), Some(storage_name(id).as_str()));
    // Downloader metadata is kept alongside the file name
    assert_eq!(
        task.metadata.get("size-bytes"),
        Some(&MetadataValue::Integer(13))
    );
    assert_eq!(downloader.calls(), vec!["https://example.com/file.txt"]);
    assert_eq!(h.store.writes(), 1);

    let mut reader = h.manager.get_task_file(ALICE, id).await.unwrap();
    let mut body = Vec::new();
    reader.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, b"file contents");

    assert_eq!(events.recv().await.unwrap(), Event::TaskClaimed { id });
    assert_eq!(
        events.recv().await.unwrap(),
        Event::TaskSucceeded {
            id,
            file_name: storage_name(id)
        }
    );
}

#[tokio::test]
async fn test_failed_download_marks_task_failed() {
    let h = harness()
        .downloader(Arc::new(FailingDownloader))
        .build()
        .await;
    let id = h.create("https://example.com/broken").await;

    let err = h.manager.execute_task(id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Download(DownloadError::HttpStatus { status: 503, .. })
    ));

    let task = h.manager.db.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, Status::Failed);
    assert!(task.retryable);
    assert!(task.metadata.get(FILE_NAME_METADATA_KEY).is_none());
    assert!(task.error_message.unwrap().contains("503"));

    // The partial body never became a readable artifact
    assert!(h.store.open_for_read(&storage_name(id)).await.is_err());
}

#[tokio::test]
async fn test_storage_open_failure_marks_task_failed() {
    let downloader = Arc::new(InstrumentedDownloader::new(b"never written"));
    let h = harness()
        .downloader(downloader.clone())
        .refuse_writes()
        .build()
        .await;
    let id = h.create("https://example.com/a").await;

    let err = h.manager.execute_task(id).await.unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert!(err.is_transient());

    assert_eq!(h.status(id).await, Status::Failed);
    assert!(downloader.calls().is_empty());
}

#[tokio::test]
async fn test_unsupported_type_fails_without_storage_write() {
    let h = harness()
        .downloader(Arc::new(InstrumentedDownloader::new(b"x")))
        .build()
        .await;

    let mut tx = h.manager.db.begin().await.unwrap();
    let task = Database::insert_task(
        &mut tx,
        &NewTask {
            owner: ALICE_ID,
            download_type: DownloadType::Unsupported(42),
            url: "magnet:?xt=urn:btih:abc".to_string(),
        },
    )
    .await
    .unwrap();
    Database::commit(tx).await.unwrap();

    h.manager.execute_task(task.id).await.unwrap();

    let task = h.manager.db.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, Status::Failed);
    assert!(!task.retryable);
    assert!(task.metadata.is_empty());
    assert_eq!(h.store.writes(), 0);
}

#[tokio::test]
async fn test_execute_unknown_or_finished_task_is_noop() {
    let downloader = Arc::new(InstrumentedDownloader::new(b"x"));
    let h = harness().downloader(downloader.clone()).build().await;

    h.manager.execute_task(TaskId(12345)).await.unwrap();

    let id = h.create("https://example.com/a").await;
    h.manager.execute_task(id).await.unwrap();
    // Redelivery of the same id
    h.manager.execute_task(id).await.unwrap();

    assert_eq!(downloader.calls().len(), 1);
    assert_eq!(h.store.writes(), 1);
    assert_eq!(h.status(id).await, Status::Success);
}

#[tokio::test]
async fn test_deadline_leaves_task_downloading() {
    let downloader = Arc::new(InstrumentedDownloader::with_delay(
        b"slow",
        Duration::from_secs(30),
    ));
    let h = harness()
        .downloader(downloader)
        .config(|c| c.dispatcher.task_timeout = Some(Duration::from_millis(200)))
        .build()
        .await;
    let id = h.create("https://example.com/slow").await;

    h.manager.execute_task_with_deadline(id).await.unwrap();

    let task = h.manager.db.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, Status::Downloading);
    assert!(task.error_message.is_none());

    // The sweep re-arms it
    assert_eq!(h.manager.reclaim_stuck_tasks().await.unwrap(), 1);
    assert_eq!(h.status(id).await, Status::Pending);
}

#[tokio::test]
async fn test_late_terminal_write_after_sweep_is_discarded() {
    let h = harness()
        .downloader(Arc::new(InstrumentedDownloader::new(b"x")))
        .build()
        .await;
    let id = h.create("https://example.com/a").await;

    h.manager.claim_task(id).await.unwrap();
    h.manager.reclaim_stuck_tasks().await.unwrap();
    assert_eq!(h.status(id).await, Status::Pending);

    // The original executor finishes after the row was re-armed
    h.manager
        .mark_failed(id, 1, &Error::Other("late".to_string()), true)
        .await
        .unwrap();
    assert_eq!(h.status(id).await, Status::Pending);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stale_executor_cannot_replace_newer_claim() {
    let downloader = Arc::new(GatedDownloader::new(b"AAAAAAAA", b"BB"));
    let h = harness().downloader(downloader.clone()).build().await;
    let id = h.create("https://example.com/long").await;

    let first = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.execute_task(id).await })
    };
    downloader.started.notified().await;

    // The sweep re-arms the task mid-download and a second executor finishes it
    assert_eq!(h.manager.reclaim_stuck_tasks().await.unwrap(), 1);
    h.manager.execute_task(id).await.unwrap();
    assert_eq!(h.status(id).await, Status::Success);

    downloader.release.notify_one();
    first.await.unwrap().unwrap();

    let task = h.manager.db.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, Status::Success);
    assert_eq!(task.attempt, 2);

    let mut reader = h.manager.get_task_file(ALICE, id).await.unwrap();
    let mut body = Vec::new();
    reader.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, b"BB");

    // The stale executor's staging file is gone too
    let files: Vec<_> = std::fs::read_dir(h._temp_dir.path().join("files"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(files, vec![std::ffi::OsString::from(storage_name(id))]);
}

#[tokio::test]
async fn test_failure_write_error_keeps_download_error() {
    let h = harness()
        .downloader(Arc::new(FailingDownloader))
        .build()
        .await;
    let id = h.create("https://example.com/broken").await;

    // Make the store reject the Failed transition
    sqlx::query(
        r#"
        CREATE TRIGGER refuse_failed BEFORE UPDATE OF status ON download_tasks
        WHEN NEW.status = 3
        BEGIN
            SELECT RAISE(ABORT, 'failed status refused');
        END
        "#,
    )
    .execute(h.manager.db.pool())
    .await
    .unwrap();

    let err = h.manager.execute_task(id).await.unwrap_err();
    assert!(
        matches!(
            err,
            Error::Download(DownloadError::HttpStatus { status: 503, .. })
        ),
        "got {err:?}"
    );
    // Left for the recovery sweep
    assert_eq!(h.status(id).await, Status::Downloading);
}
