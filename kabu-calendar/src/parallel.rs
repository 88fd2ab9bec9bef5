//! Bounded parallel task runner
//!
//! Runs a set of named tasks with at most `max_workers` in flight and
//! collects the successful results by name.
//!
//! # Error Isolation
//! A task that returns `Err`, panics, or exceeds the per-task timeout is
//! logged with `warn!` and left out of the result map. One failing task
//! never affects the others.
//!
//! # Concurrency
//! Tasks are spawned onto the tokio runtime (`tokio::spawn`), so on the
//! multi-threaded runtime they run on real worker threads. The bound comes
//! from `futures::stream::buffer_unordered(max_workers)`.

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Boxed future produced by a task
pub type TaskFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

/// Deferred unit of work; nothing runs until the runner calls it
pub type Task<T> = Box<dyn FnOnce() -> TaskFuture<T> + Send>;

/// Box an async closure into a [`Task`]
pub fn task<T, F, Fut>(f: F) -> Task<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Box::new(move || -> TaskFuture<T> { Box::pin(f()) })
}

#[derive(Debug, Clone)]
pub struct ParallelRunner {
    max_workers: usize,
    task_timeout: Option<Duration>,
}

impl ParallelRunner {
    /// Runner with the given worker bound (0 is treated as 1)
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            task_timeout: None,
        }
    }

    /// Abandon any task still running after `timeout`
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run every task and return the successful results by name
    ///
    /// Failed tasks are logged and omitted. Empty input returns an empty
    /// map without touching the runtime.
    pub async fn run<K, T, I>(&self, tasks: I) -> HashMap<String, T>
    where
        K: Into<String>,
        T: Send + 'static,
        I: IntoIterator<Item = (K, Task<T>)>,
    {
        let tasks: Vec<(String, Task<T>)> =
            tasks.into_iter().map(|(name, t)| (name.into(), t)).collect();
        if tasks.is_empty() {
            return HashMap::new();
        }

        let total = tasks.len();
        let timeout = self.task_timeout;

        let outcomes: Vec<(String, Option<T>)> = stream::iter(tasks)
            .map(|(name, task)| async move {
                let handle = tokio::spawn(async move {
                    match timeout {
                        Some(limit) => match tokio::time::timeout(limit, task()).await {
                            Ok(result) => result,
                            Err(_) => Err(anyhow::anyhow!("timed out after {:?}", limit)),
                        },
                        None => task().await,
                    }
                });

                let value = match handle.await {
                    Ok(Ok(value)) => Some(value),
                    Ok(Err(e)) => {
                        warn!(task = %name, error = %e, "Task failed (isolated)");
                        None
                    }
                    Err(join_error) => {
                        warn!(task = %name, error = %join_error, "Task panicked (isolated)");
                        None
                    }
                };
                (name, value)
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        let results: HashMap<String, T> = outcomes
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .collect();

        debug!(
            total,
            succeeded = results.len(),
            workers = self.max_workers,
            "Parallel run finished"
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn test_empty_input_returns_empty_map() {
        let runner = ParallelRunner::new(4);
        let results: HashMap<String, u32> = runner.run(Vec::<(String, Task<u32>)>::new()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_omitted() {
        let runner = ParallelRunner::new(2);
        let tasks: Vec<(&str, Task<u32>)> = vec![
            ("ok", task(|| async { Ok(1) })),
            ("err", task(|| async { Err(anyhow::anyhow!("boom")) })),
            (
                "panic",
                task(|| async {
                    if true {
                        panic!("worker blew up");
                    }
                    Ok(2)
                }),
            ),
        ];

        let results = runner.run(tasks).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results.get("ok"), Some(&1));
    }

    #[tokio::test]
    async fn test_tasks_run_concurrently() {
        let runner = ParallelRunner::new(3);
        let tasks: Vec<(String, Task<()>)> = (0..3)
            .map(|i| {
                let t = task(|| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                });
                (format!("t{}", i), t)
            })
            .collect();

        let start = Instant::now();
        let results = runner.run(tasks).await;

        assert_eq!(results.len(), 3);
        assert!(
            start.elapsed() < Duration::from_millis(500),
            "three 200ms tasks with three workers should overlap, took {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_worker_bound_is_respected() {
        let runner = ParallelRunner::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<(String, Task<()>)> = (0..6)
            .map(|i| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                let t = task(move || async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                });
                (format!("t{}", i), t)
            })
            .collect();

        let results = runner.run(tasks).await;

        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_timeout_drops_slow_task() {
        let runner = ParallelRunner::new(2).with_task_timeout(Duration::from_millis(50));
        let tasks: Vec<(&str, Task<&str>)> = vec![
            ("fast", task(|| async { Ok("done") })),
            (
                "slow",
                task(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok("late")
                }),
            ),
        ];

        let results = runner.run(tasks).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results.get("fast"), Some(&"done"));
    }

    #[test]
    fn test_zero_workers_clamped() {
        assert_eq!(ParallelRunner::new(0).max_workers(), 1);
    }
}
