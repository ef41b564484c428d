//! Bounded exponential backoff for transient service failures.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Errors that can tell whether repeating the call may succeed.
pub trait Retryable {
    /// True when the failure is transient and the call may be repeated.
    fn is_retryable(&self) -> bool;
}

/// Blocks the calling thread between attempts.
pub trait Sleeper: Send + Sync {
    /// Waits for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Sleeper backed by [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Source of backoff jitter in `[0, 1)` seconds.
pub trait Jitter: Send + Sync {
    /// Draws one jitter sample.
    fn sample(&self) -> f64;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn sample(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Retry schedule: `base^attempt + jitter` seconds between attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    base: f64,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn Jitter>,
}

impl RetryPolicy {
    /// Policy with base 2, real sleeps and random jitter.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base: 2.0,
            sleeper: Arc::new(ThreadSleeper),
            jitter: Arc::new(RandomJitter),
        }
    }

    /// Swaps the sleeper (tests record sleeps instead of blocking).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Swaps the jitter source.
    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after the failed attempt numbered `attempt` (0-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let jitter = self.jitter.sample().clamp(0.0, 1.0);
        Duration::from_secs_f64(self.base.powi(exponent) + jitter)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 0usize;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "transient failure; backing off"
                    );
                    self.sleeper.sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base", &self.base)
            .finish()
    }
}
