
use crate::db::{Database, NewTask};
use crate::types::{AccountId, DownloadTask, DownloadType, Status};

pub(super) fn http_task(owner: i64, url: &str) -> NewTask {
    NewTask {
        owner: AccountId(owner),
        download_type: DownloadType::Http,
        url: url.to_string(),
    }
}

/// Insert and commit a task, then force it into `status`
pub(super) async fn seed_task(db: &Database, owner: i64, status: Status) -> DownloadTask {
    let mut tx = db.begin().await.unwrap();
    let mut task = Database::insert_task(&mut tx, &http_task(owner, "https://example.com/a"))
        .await
        .unwrap();
    if status != Status::Pending {
        task.status = status;
        Database::update_task(&mut tx, &task).await.unwrap();
    }
    Database::commit(tx).await.unwrap();
    task
}
