//! Worker pool: N workers pulling job ids from the queue.
//!
//! Cancellation only stops dequeuing. A job that has been dequeued runs to a
//! terminal state before its worker exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::processor::JobProcessor;
use crate::queue::JobQueue;

/// Pause after a queue error before trying again.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(2);

pub struct WorkerPool {
    processor: Arc<JobProcessor>,
    queue: Arc<dyn JobQueue>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(processor: Arc<JobProcessor>, queue: Arc<dyn JobQueue>, concurrency: usize) -> Self {
        Self {
            processor,
            queue,
            concurrency: concurrency.max(1),
        }
    }

    /// Run every worker until `cancel` fires or the queue closes.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(concurrency = self.concurrency, "Worker pool started");

        let mut workers = JoinSet::new();
        for worker in 0..self.concurrency {
            workers.spawn(worker_loop(
                worker,
                Arc::clone(&self.processor),
                Arc::clone(&self.queue),
                cancel.clone(),
            ));
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    processor: Arc<JobProcessor>,
    queue: Arc<dyn JobQueue>,
    cancel: CancellationToken,
) {
    tracing::debug!(worker, "Worker started");
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = queue.dequeue() => next,
        };

        match next {
            Ok(Some(job_id)) => {
                if let Err(e) = processor.process(job_id).await {
                    tracing::error!(worker, job_id = %job_id, error = %e, "Failed to record job outcome");
                }
            }
            Ok(None) => {
                tracing::info!(worker, "Job queue closed");
                break;
            }
            Err(e) => {
                tracing::error!(worker, error = %e, "Dequeue failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(QUEUE_ERROR_BACKOFF) => {}
                }
            }
        }
    }
    tracing::debug!(worker, "Worker stopped");
}
