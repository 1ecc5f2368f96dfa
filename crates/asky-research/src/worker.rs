//! Bounded background worker pool.
//!
//! A fixed number of workers drain a bounded queue of boxed futures.
//! Submission blocks briefly when the queue is full but never drops a
//! task; shutdown closes the queue and drains everything still pending.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{ResearchError, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

/// Clonable submission handle, detached from pool ownership so callers can
/// enqueue without holding any lock on the pool's owner.
#[derive(Clone)]
pub struct PoolHandle {
    tx: mpsc::Sender<Job>,
}

impl PoolHandle {
    /// Enqueue a job. Blocks the submitter only while the queue is full.
    pub async fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx
            .send(Box::pin(job))
            .await
            .map_err(|_| ResearchError::Pool("pool is shut down".to_string()))
    }
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing one bounded queue.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = Arc::clone(&rx);
            handles.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                debug!(worker_id, "worker drained and exiting");
            }));
        }

        Self { tx, handles }
    }

    /// Enqueue a job. Blocks the submitter only while the queue is full.
    pub async fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx
            .send(Box::pin(job))
            .await
            .map_err(|_| ResearchError::Pool("pool is shut down".to_string()))
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle { tx: self.tx.clone() }
    }

    /// Close the queue and wait for all pending jobs to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.handles {
            let _ = handle.await;
        }
        debug!("worker pool shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn all_submitted_jobs_run_before_shutdown_returns() {
        let pool = WorkerPool::new(2, 4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }
        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submit_after_shutdown_fails() {
        let pool = WorkerPool::new(1, 1);
        let tx = pool.tx.clone();
        pool.shutdown().await;
        let result = tx.send(Box::pin(async {})).await;
        assert!(result.is_err());
    }
}
