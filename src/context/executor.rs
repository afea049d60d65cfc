//! Bounded task pool for sink deliveries.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A bounded pool of workers draining a bounded job queue.
///
/// The push stage submits one job per batch and never awaits it;
/// concurrency across batches equals the worker count, and a full queue
/// rejects the submission so the stage can treat it as an error batch.
/// Dropping the executor closes the queue; workers finish whatever was
/// already submitted and exit.
pub(crate) struct TaskExecutor {
    tx: async_channel::Sender<Job>,
    queue_capacity: usize,
}

/// The job queue was full; the batch was not submitted.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ExecutorFull;

impl TaskExecutor {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded::<Job>(queue_capacity);
        for worker in 0..workers {
            let rx = rx.clone();
            tokio::spawn(async move {
                while let Ok(job) = rx.recv().await {
                    job.await;
                }
                debug!(worker, "push executor worker exiting");
            });
        }
        Self { tx, queue_capacity }
    }

    /// Queue a job without blocking. Errors when the queue is full or the
    /// executor is gone; the job is dropped in either case.
    pub fn try_submit<F>(&self, job: F) -> Result<(), ExecutorFull>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx.try_send(Box::pin(job)).map_err(|_| ExecutorFull)
    }

    /// Free slots in the job queue.
    pub fn remaining_capacity(&self) -> usize {
        self.queue_capacity.saturating_sub(self.tx.len())
    }

    /// Total slots in the job queue.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}
