//! # Exponential Backoff
//!
//! Provides a capped exponential backoff used for two things: per-object requeue
//! delays after failed reconciles, and the delay sequence of cloud API retries.
//!
//! Default requeue sequence: 10s, 20s, 40s, 80s, 160s, 300s (max).

use std::time::Duration;

/// Exponential backoff calculator
///
/// Each delay is the previous one multiplied by `factor`, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// First delay (and the value restored on reset)
    initial: Duration,
    /// Growth factor between consecutive delays
    factor: f64,
    /// Upper bound
    max: Duration,
    /// Delay returned by the next call
    current: Duration,
}

impl ExponentialBackoff {
    /// Create a new backoff starting at `initial`, growing by `factor`, capped at `max`
    #[must_use]
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        Self {
            initial,
            factor,
            max,
            current: initial.min(max),
        }
    }

    /// Backoff used for requeueing objects whose reconcile failed
    #[must_use]
    pub fn for_requeue() -> Self {
        Self::new(Duration::from_secs(10), 2.0, Duration::from_secs(300))
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.factor).min(self.max.as_secs_f64()),
        );
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}
