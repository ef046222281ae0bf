//! Retry policy for cloud API calls.
//!
//! Wraps a single EC2 call in a bounded exponential backoff. Only errors accepted
//! by the caller's classifier are retried; everything else is returned at once.

use crate::backoff::ExponentialBackoff;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for a single retry delay
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each attempt
    pub factor: f64,
    /// Each delay is stretched by up to this fraction of itself
    pub jitter: f64,
    /// Maximum number of attempts
    pub steps: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            factor: 1.5,
            jitter: 0.4,
            steps: 10,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries `steps` times without sleeping
    #[must_use]
    pub fn immediate(steps: u32) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            factor: 1.0,
            jitter: 0.0,
            steps,
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let stretch = rand::thread_rng().gen_range(0.0..self.jitter);
        Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + stretch))
    }

    /// Runs `operation` until it succeeds, fails with an error `retryable` rejects,
    /// or the attempts run out. The last error is returned in the latter two cases.
    ///
    /// # Errors
    ///
    /// Returns the operation's error when it is not retryable or retries are exhausted.
    pub async fn run<F, Fut, T, E>(
        &self,
        operation_name: &str,
        retryable: impl Fn(&E) -> bool,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut backoff = ExponentialBackoff::new(self.initial_delay, self.factor, MAX_RETRY_DELAY);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => {
                    debug!("{} failed with non-retryable error: {}", operation_name, e);
                    return Err(e);
                }
                Err(e) if attempt >= self.steps.max(1) => {
                    warn!("{} still failing after {} attempts: {}", operation_name, attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.jittered(backoff.next_backoff());
                    debug!(
                        "{} failed (attempt {}), retrying in {:?}: {}",
                        operation_name, attempt, delay, e
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_retryable_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<u32, String> = RetryPolicy::immediate(5)
            .run("op", |e: &String| e == "not found", || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err("not found".to_string()) } else { Ok(n) }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = RetryPolicy::immediate(5)
            .run("op", |e: &String| e == "not found", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("denied".to_string()) }
            })
            .await;

        assert_eq!(result, Err("denied".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_steps() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = RetryPolicy::immediate(4)
            .run("op", |_: &String| true, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("not found".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_policy_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = RetryPolicy::default()
            .run("op", |_: &String| true, || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("not found".to_string()) } else { Ok(()) } }
            })
            .await;

        assert!(result.is_ok());
        // 500ms then 750ms, each stretched by at most 40%
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1250));
        assert!(elapsed < Duration::from_millis(1750));
    }
}
