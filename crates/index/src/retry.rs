use crate::sink::StoreError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 1000, 10_000).with_attempt_timeout(Duration::from_secs(30))
    }
}

/// Result of a retried operation together with how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, StoreError>,
    pub attempts: usize,
}

impl<T> RetryOutcome<T> {
    pub fn retried(&self) -> bool {
        self.attempts > 1
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
            attempt_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Delay before retry number `retry` (1-based): the initial backoff
    /// doubled each time, capped at the maximum.
    pub fn backoff_for(&self, retry: usize) -> Duration {
        let shift = retry.saturating_sub(1).min(31) as u32;
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    /// Run `f` until it succeeds, fails permanently, or transient failures
    /// exhaust the retry budget.
    ///
    /// Each attempt is bounded by the attempt timeout; an attempt that runs
    /// over counts as a transient failure. Errors are returned in the outcome
    /// rather than raised, so callers decide what a failure means.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut f: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match timeout(self.attempt_timeout, f()).await {
                Ok(Ok(result)) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempts = attempt,
                            "Operation succeeded after retries"
                        );
                    }
                    return RetryOutcome {
                        result: Ok(result),
                        attempts: attempt,
                    };
                }
                Ok(Err(e)) => e,
                Err(_) => StoreError::Transient(format!(
                    "attempt timed out after {} ms",
                    self.attempt_timeout.as_millis()
                )),
            };

            if !error.is_transient() {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %error,
                    "Operation failed permanently, not retrying"
                );
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            if attempt > self.max_retries {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %error,
                    "Operation failed after max retries"
                );
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            let backoff = self.backoff_for(attempt);
            warn!(
                operation = operation_name,
                attempt = attempt,
                max_retries = self.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Operation failed, retrying"
            );

            sleep(backoff).await;
        }
    }
}
