//! Durable work queue contract and its implementations.
//!
//! A queue carries job ids only; the record itself lives in the job store.
//! Each enqueued id is handed to exactly one consumer.

use std::time::Duration;

use async_trait::async_trait;
use dbforge_core::types::JobId;
use dbforge_db::{DbPool, JobQueueRepo};
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job queue is closed")]
    Closed,

    #[error("Queue database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Wait for the next unit. `Ok(None)` once the queue is closed and drained.
    async fn dequeue(&self) -> Result<Option<JobId>, QueueError>;
}

// ---------------------------------------------------------------------------
// LocalQueue
// ---------------------------------------------------------------------------

/// In-process FIFO queue. Units do not survive a restart; the local
/// services re-enqueue unfinished records from the job store on startup.
pub struct LocalQueue {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<JobId>>>,
    rx: Mutex<mpsc::UnboundedReceiver<JobId>>,
}

impl LocalQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }

    /// Stop accepting units. Consumers drain what is left, then see `None`.
    ///
    /// Dropping the sender wakes a consumer parked in `dequeue` without
    /// needing the receiver lock it holds.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError> {
        let tx = self.tx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx.send(job_id).map_err(|_| QueueError::Closed),
            None => Err(QueueError::Closed),
        }
    }

    /// The receiver mutex is held across `recv().await`. This is the one lock
    /// in the pipeline held over a suspension point: it is what turns the
    /// single-consumer channel into a work queue, so consumers wait their
    /// turn and each unit reaches exactly one of them. Nothing else ever
    /// takes this lock.
    async fn dequeue(&self) -> Result<Option<JobId>, QueueError> {
        Ok(self.rx.lock().await.recv().await)
    }
}

// ---------------------------------------------------------------------------
// PgJobQueue
// ---------------------------------------------------------------------------

/// Queue backed by the `schema_job_queue` table, shared across processes.
pub struct PgJobQueue {
    pool: DbPool,
    poll_interval: Duration,
}

impl PgJobQueue {
    pub fn new(pool: DbPool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError> {
        JobQueueRepo::push(&self.pool, job_id).await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<JobId>, QueueError> {
        loop {
            if let Some(job_id) = JobQueueRepo::claim_next(&self.pool).await? {
                return Ok(Some(job_id));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
