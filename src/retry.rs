// ABOUTME: Retry policy strategy trait and reference implementations
// ABOUTME: Provides exponential backoff and fixed delay policies for failed task attempts

use std::time::Duration;

use crate::error::TaskError;

/// Strategy object deciding retryability and backoff for a failed task.
///
/// The scheduler depends only on these four operations; callers may supply
/// fixed-delay, no-retry or jittered variants by implementing the trait.
/// `attempt` passed to [`RetryPolicy::delay`] is 1-based and never exceeds
/// [`RetryPolicy::max_retries`].
pub trait RetryPolicy: Send + Sync {
    /// Whether the given failure should be retried at all.
    fn should_retry(&self, error: &TaskError) -> bool {
        error.is_retryable()
    }

    /// Maximum number of retries after the initial attempt. A task with
    /// `max_retries() == N` executes at most N + 1 times.
    fn max_retries(&self) -> u32;

    fn base_delay(&self) -> Duration;

    /// Delay to wait before retry number `attempt` (1-based).
    fn delay(&self, attempt: u32) -> Duration;
}

/// Reference policy: delay grows exponentially from the base delay,
/// capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_retries: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn base_delay(&self) -> Duration {
        self.base_delay
    }

    fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let millis =
            self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32 - 1);
        let delay = Duration::from_millis(millis as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Retries a fixed number of times with a constant delay between attempts.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    max_retries: u32,
    delay: Duration,
}

impl FixedDelay {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }
}

impl RetryPolicy for FixedDelay {
    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn base_delay(&self) -> Duration {
        self.delay
    }

    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}
