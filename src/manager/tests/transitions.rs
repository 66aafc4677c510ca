use std::sync::Arc;

use crate::error::Error;
use crate::manager::test_helpers::{InstrumentedDownloader, harness};
use crate::types::{ClaimOutcome, Event, Status, TaskId};

#[tokio::test]
async fn test_claim_pending_task() {
    let h = harness().build().await;
    let id = h.create("https://example.com/a").await;
    let mut events = h.manager.subscribe();

    match h.manager.claim_task(id).await.unwrap() {
        ClaimOutcome::Claimed { task, attempt } => {
            // Snapshot is taken before the transition
            assert_eq!(task.id, id);
            assert_eq!(task.status, Status::Pending);
            assert_eq!(task.attempt, 0);
            assert_eq!(attempt, 1);
        }
        ClaimOutcome::Skipped => panic!("pending task should be claimed"),
    }

    assert_eq!(h.status(id).await, Status::Downloading);
    assert_eq!(events.recv().await.unwrap(), Event::TaskClaimed { id });
}

#[tokio::test]
async fn test_claim_is_noop_for_every_non_pending_status() {
    let h = harness().build().await;

    for status in [Status::Downloading, Status::Success, Status::Failed] {
        let id = h.create("https://example.com/a").await;
        h.force_status(id, status).await;

        assert_eq!(h.manager.claim_task(id).await.unwrap(), ClaimOutcome::Skipped);
        assert_eq!(h.status(id).await, status, "claim must not touch a {status} task");
    }
}

#[tokio::test]
async fn test_claim_unknown_task_is_not_found() {
    let h = harness().build().await;

    match h.manager.claim_task(TaskId(999)).await {
        Err(Error::NotFound(id)) => assert_eq!(id, TaskId(999)),
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let h = harness().build().await;
    let id = h.create("https://example.com/a").await;

    let mut claims = Vec::new();
    for _ in 0..8 {
        let manager = h.manager.clone();
        claims.push(tokio::spawn(async move { manager.claim_task(id).await }));
    }

    let mut winners = 0;
    for claim in claims {
        if let ClaimOutcome::Claimed { .. } = claim.await.unwrap().unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(h.status(id).await, Status::Downloading);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_executions_download_once() {
    let downloader = Arc::new(InstrumentedDownloader::new(b"payload"));
    let h = harness().downloader(downloader.clone()).build().await;
    let id = h.create("https://example.com/once").await;

    // Event path and sweep path racing on the same id
    let mut runs = Vec::new();
    for _ in 0..4 {
        let manager = h.manager.clone();
        runs.push(tokio::spawn(async move { manager.execute_task(id).await }));
    }
    for run in runs {
        run.await.unwrap().unwrap();
    }

    assert_eq!(downloader.calls().len(), 1);
    assert_eq!(h.status(id).await, Status::Success);
}
