use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::domain::ScrapeTask;
use crate::scraper::MAX_WAIT;

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    #[error("task aborted: {0}")]
    Aborted(String),
}

/// Observes queue occupancy so the browser manager can tell when work has drained
pub trait QueueActivity: Send + Sync {
    /// Tasks submitted but not yet admitted
    fn pending_count(&self) -> usize;

    /// Tasks currently running
    fn active_count(&self) -> usize;

    fn is_idle(&self) -> bool {
        self.pending_count() == 0 && self.active_count() == 0
    }
}

/// Decrements its counter when dropped, whatever path the task takes
struct CounterGuard(Arc<AtomicUsize>);

impl CounterGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded-concurrency admission for render tasks.
///
/// Jobs beyond the limit wait in FIFO order. Each job runs on its own tokio
/// task, so a caller that gives up does not cancel a job already running.
pub struct ScrapeQueue {
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_concurrency: usize,
}

impl ScrapeQueue {
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            pending: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run `job` once a slot is free, resolving with `QueueError::Timeout` if it
    /// has not finished within `timeout` of submission.
    pub async fn enqueue<F, Fut, T>(&self, task: &ScrapeTask, job: F, timeout: Duration) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = timeout.min(MAX_WAIT);
        let deadline = Instant::now() + timeout;
        let semaphore = self.semaphore.clone();
        let active = self.active.clone();
        let waiting = CounterGuard::enter(&self.pending);
        let label = format!("{} {} (attempt {})", task.kind.as_str(), task.url, task.attempt);

        debug!(
            "Queueing {}: {} active, {} pending",
            label,
            self.active_count(),
            self.pending_count()
        );

        let handle = tokio::spawn({
            let label = label.clone();
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| QueueError::Aborted("queue closed".to_string()))?;
                drop(waiting);

                // The caller has already been told about the timeout
                if Instant::now() >= deadline {
                    debug!("Skipping {}: deadline passed while waiting", label);
                    return Err(QueueError::Timeout(timeout));
                }

                let _running = CounterGuard::enter(&active);
                Ok(job().await)
            }
        });

        match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Task join error for {}: {}", label, e);
                Err(QueueError::Aborted(e.to_string()))
            }
            Err(_) => {
                warn!("{} timed out after {:?}", label, timeout);
                Err(QueueError::Timeout(timeout))
            }
        }
    }
}

impl Default for ScrapeQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl QueueActivity for ScrapeQueue {
    fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}
