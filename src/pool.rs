use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("inference pool is shut down")]
    Closed,
    #[error("inference task panicked: {0}")]
    Panicked(String),
}

/// Bounded executor for blocking model invocations.
///
/// Submissions acquire one of `max_workers` permits before running on the
/// blocking thread pool, so at most `max_workers` model calls execute
/// concurrently process-wide. Waiters are served in FIFO order. A failing or
/// panicking job releases its permit and leaves the pool usable.
pub struct InferencePool {
    permits: Arc<Semaphore>,
}

impl InferencePool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    pub async fn run<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let handle = tokio::task::spawn_blocking(move || {
            let out = job();
            drop(permit);
            out
        });

        handle.await.map_err(|e| {
            if e.is_panic() {
                PoolError::Panicked(e.to_string())
            } else {
                PoolError::Closed
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_worker_bound() {
        let pool = Arc::new(InferencePool::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
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

    #[tokio::test]
    async fn failed_job_does_not_poison_pool() {
        let pool = InferencePool::new(1);

        let failed: Result<Result<(), String>, PoolError> =
            pool.run(|| Err("model exploded".to_string())).await;
        assert!(matches!(failed, Ok(Err(_))));

        let ok = pool.run(|| 7).await.unwrap();
        assert_eq!(ok, 7);
    }

    #[tokio::test]
    async fn panicked_job_surfaces_error_and_frees_permit() {
        let pool = InferencePool::new(1);

        let result = pool.run(|| panic!("boom")).await;
        assert!(matches!(result, Err(PoolError::Panicked(_))));

        let ok = pool.run(|| 42).await.unwrap();
        assert_eq!(ok, 42);
    }
}
