//! Bounded fan-out worker pool
//!
//! A fixed number of workers drain a fixed-capacity job queue. [`WorkerPool::submit`]
//! waits while the queue is full; [`WorkerPool::drain`] closes the queue and waits
//! for every submitted job to finish. At most `workers` jobs run at any instant.
//!
//! Each job runs on its own tokio task so a panicking job is reported and the
//! worker moves on to the next one.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::error::{Error, Result};

type Job = BoxFuture<'static, ()>;

/// Fixed-size pool of async workers
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: JoinSet<()>,
}

impl WorkerPool {
    /// Start `workers` workers behind a queue of `queue_capacity` jobs
    ///
    /// Both values are clamped to at least one.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let mut join = JoinSet::new();
        for worker_idx in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            join.spawn(async move {
                run_worker(worker_idx, receiver).await;
            });
        }

        Self {
            sender,
            workers: join,
        }
    }

    /// Queue a job, waiting for room if the queue is full
    pub async fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.sender
            .send(Box::pin(job))
            .await
            .map_err(|_| Error::Other("worker pool stopped".to_string()))
    }

    /// Stop accepting jobs and wait until every queued job has run
    pub async fn drain(self) {
        let Self {
            sender,
            mut workers,
        } = self;
        drop(sender);

        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "worker pool worker exited abnormally");
            }
        }
    }
}

async fn run_worker(worker_idx: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(job) = job else {
            break;
        };

        if let Err(e) = tokio::spawn(job).await {
            tracing::error!(worker = worker_idx, error = %e, "worker pool job panicked");
        }
    }
}
