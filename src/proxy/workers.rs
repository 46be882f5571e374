//! Bounded lookup worker pool.
//!
//! Lookups run as spawned tasks gated by a semaphore, so no more than the
//! configured number are in flight at once; excess submissions wait at the
//! submission point. [`WorkerPool::wait`] drains the pool at shutdown.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

/// Semaphore-bounded pool of independent, unordered tasks.
#[derive(Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    capacity: usize,
}

impl WorkerPool {
    /// Create a pool running at most `capacity` tasks concurrently.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            tracker: TaskTracker::new(),
            capacity,
        }
    }

    /// Maximum concurrent tasks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks currently running or queued.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Submit a task, waiting here while the pool is at capacity.
    pub async fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            // The semaphore is never closed; reachable only during teardown.
            return;
        };
        self.tracker.spawn(async move {
            let _permit = permit;
            task.await;
        });
    }

    /// Wait for every submitted task to complete.
    ///
    /// Called once during shutdown; tasks submitted afterwards still run
    /// but are no longer awaited.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_tasks_run_to_completion() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            pool.submit(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }

        pool.wait().await;
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = Arc::new(WorkerPool::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let high_water = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let high_water = Arc::clone(&high_water);
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                high_water.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .await;
        }

        pool.wait().await;
        assert!(
            high_water.load(Ordering::SeqCst) <= 2,
            "more tasks ran than the pool allows"
        );
    }

    #[tokio::test]
    async fn test_capacity_accessor() {
        let pool = WorkerPool::new(8);
        assert_eq!(pool.capacity(), 8);
        assert_eq!(pool.in_flight(), 0);
    }
}
