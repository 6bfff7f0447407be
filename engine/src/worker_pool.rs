//! Bounded worker pool executing sighting-processing jobs (component D,
//! spec §4.D). Grounded in `Geo-Fencing.c`'s `thpool_init`/`thpool_add_work`/
//! `thpool_destroy`, reimplemented over `tokio` tasks consuming one bounded
//! MPSC channel instead of an intrusive work queue.
//!
//! Design Note (spec §9, "Backpressure by polling"): the receiver's
//! `Sleep(WAITING_TIME)` spin-wait when `num_threads_working ==
//! num_threads_alive` is replaced by a bounded channel with an `async`
//! `submit` that suspends the caller when full — equivalent semantics
//! (never drops, never grows the pool), no busy-wait. `active`/`alive`
//! stay observable via atomics for `/metrics` and for parity with the
//! original's `num_threads_working`/`num_threads_alive`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    active: Arc<AtomicUsize>,
    alive: usize,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(num_threads: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_depth);
        let active = Arc::new(AtomicUsize::new(0));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut handles = Vec::with_capacity(num_threads);

        for worker_id in 0..num_threads {
            let rx = rx.clone();
            let active = active.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match job {
                        Some(job) => {
                            active.fetch_add(1, Ordering::SeqCst);
                            job.await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        }
                        None => {
                            warn!(worker_id, "worker pool channel closed, shutting down");
                            break;
                        }
                    }
                }
            }));
        }

        Self {
            tx,
            active,
            alive: num_threads,
            handles,
        }
    }

    /// Enqueues a unit of work. Suspends the caller (never drops, never
    /// grows the pool) when every worker is busy and the queue is full —
    /// the blocking-submit equivalent of the original's backpressure sleep.
    pub async fn submit<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tx.send(Box::pin(fut)).await.is_err() {
            error!("worker pool submit failed: channel closed");
        }
    }

    pub fn num_threads_working(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn num_threads_alive(&self) -> usize {
        self.alive
    }

    pub fn is_saturated(&self) -> bool {
        self.tx.capacity() == 0
    }

    /// Signals shutdown and joins every worker, matching `thpool_destroy`.
    pub async fn destroy(self) {
        drop(self.tx);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn submitted_jobs_all_run() {
        let pool = WorkerPool::new(4, 16);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..20 {
            let counter = counter.clone();
            pool.submit(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        pool.destroy().await;
    }

    #[tokio::test]
    async fn alive_count_matches_configured_size() {
        let pool = WorkerPool::new(5, 8);
        assert_eq!(pool.num_threads_alive(), 5);
        pool.destroy().await;
    }
}
