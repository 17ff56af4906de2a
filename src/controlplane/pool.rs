//! Bounded worker pool for control-plane fetches
//!
//! A fixed number of workers drain a bounded job queue. `submit` waits for a
//! free slot, `try_submit` reports a full queue so the caller can drop the
//! job instead of piling up concurrent fetches.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Error, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Fixed-size pool of fetch workers
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    capacity: usize,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` workers sharing a queue of `queue_size` jobs
    pub fn new(workers: usize, queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_size.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|id| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the lock only while waiting for the next job
                        let job = { rx.lock().await.recv().await };
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    debug!(worker = id, "Fetch worker stopped");
                })
            })
            .collect();

        Self {
            tx,
            capacity: queue_size.max(1),
            workers,
        }
    }

    /// Queue capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a job, waiting while the queue is full
    pub async fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx
            .send(Box::pin(job))
            .await
            .map_err(|_| Error::internal_with_context("worker pool is shut down", "pool"))
    }

    /// Queue a job without waiting; a full queue is reported as [`Error::QueueFull`]
    pub fn try_submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx.try_send(Box::pin(job)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!(capacity = self.capacity, "Fetch queue full");
                Error::QueueFull {
                    capacity: self.capacity,
                }
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::internal_with_context("worker pool is shut down", "pool")
            }
        })
    }

    /// Queue a job and get a receiver for its output
    pub async fn run<F, T>(&self, job: F) -> Result<oneshot::Receiver<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(async move {
            let _ = tx.send(job.await);
        })
        .await?;
        Ok(rx)
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
