// src/offload.rs
//
// Bounded worker pool for blocking pose-estimation calls. At most K
// detections run concurrently across all sessions; excess callers queue on
// the semaphore, which is the pipeline's backpressure mechanism. A caller
// cancelled at the await point leaves the blocking call running to
// completion; its permit is released when the work finishes, so in-flight
// detections drain rather than abort.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct DetectionPool {
    semaphore: Arc<Semaphore>,
    workers: usize,
}

impl DetectionPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run a blocking task off the async path, bounded by the pool size.
    pub async fn run<T, F>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.semaphore.clone().acquire_owned().await?;
        let handle = tokio::task::spawn_blocking(move || {
            let out = task();
            drop(permit);
            out
        });
        handle.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_returns_task_result() {
        let pool = DetectionPool::new(2);
        let out = pool.run(|| Ok(41 + 1)).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_propagates_task_error() {
        let pool = DetectionPool::new(2);
        let out: Result<()> = pool.run(|| anyhow::bail!("detector exploded")).await;
        assert!(out.is_err());
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_pool_size() {
        let pool = DetectionPool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
