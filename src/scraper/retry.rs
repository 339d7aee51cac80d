use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::scraper::ScrapeError;

/// Bounded retries with a linearly growing pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Pause after the failed `attempt` (zero-based): `(attempt + 1) × base_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_add(1))
    }

    /// Run `op` until it succeeds, fails terminally, or the retry budget is spent.
    ///
    /// `op` receives the zero-based attempt number. The last error is returned as-is.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, ScrapeError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "Attempt {} of {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!("Giving up after attempt {}: {}", attempt + 1, e);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_delay_grows_linearly() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_cap_with_non_decreasing_delays() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let starts = Arc::new(Mutex::new(Vec::new()));

        let result: Result<(), ScrapeError> = policy
            .run(|_attempt| {
                let starts = starts.clone();
                async move {
                    starts.lock().unwrap().push(Instant::now());
                    Err(ScrapeError::Blocked("Cloudflare".into()))
                }
            })
            .await;

        assert_eq!(result, Err(ScrapeError::Blocked("Cloudflare".into())));

        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 4);
        let gaps: Vec<Duration> = starts.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|g| g[0] <= g[1]));
        assert_eq!(gaps[0], Duration::from_secs(1));
        assert_eq!(gaps[2], Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let mut calls = 0;

        let result: Result<(), ScrapeError> = policy
            .run(|_| {
                calls += 1;
                async { Err(ScrapeError::ExtractionFailure("no title".into())) }
            })
            .await;

        let err = assert_err!(result);
        assert!(!err.is_retryable());
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_later_attempt() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100));

        let result = policy
            .run(|attempt| async move {
                if attempt == 0 {
                    Err(ScrapeError::QueueTimeout(Duration::from_secs(60)))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(assert_ok!(result), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_secs(10));
        let mut calls = 0;
        let _ = policy
            .run(|_| {
                calls += 1;
                async { Err::<(), _>(ScrapeError::Blocked("x".into())) }
            })
            .await;
        assert_eq!(calls, 1);
    }
}
