//! Bounded exponential backoff for remote calls.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MIN_WAIT_MS: u64 = 1_000;
const DEFAULT_MAX_WAIT_MS: u64 = 10_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Retry policy: wait before attempt `n + 1` is
/// `clamp(min_wait * 2^(n - 1), min_wait, max_wait)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_min_wait_ms")]
    pub min_wait_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_min_wait_ms() -> u64 {
    DEFAULT_MIN_WAIT_MS
}

fn default_max_wait_ms() -> u64 {
    DEFAULT_MAX_WAIT_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_wait_ms: DEFAULT_MIN_WAIT_MS,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Outcome of a failed [`RetryPolicy::run`].
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

impl RetryPolicy {
    /// Backoff to sleep after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let wait = self
            .min_wait_ms
            .saturating_mul(1u64 << exp)
            .clamp(self.min_wait_ms, self.max_wait_ms.max(self.min_wait_ms));
        Duration::from_millis(wait)
    }

    /// Upper bound on the total time spent sleeping across all retries.
    #[cfg(test)]
    pub fn max_total_wait(&self) -> Duration {
        Duration::from_millis(
            self.max_wait_ms
                .saturating_mul(self.max_attempts.saturating_sub(1) as u64),
        )
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// attempt ceiling is reached. `sleep` is invoked between attempts.
    pub fn run<T, E, F, S>(
        &self,
        mut op: F,
        is_transient: impl Fn(&E) -> bool,
        mut sleep: S,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        S: FnMut(Duration),
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(error) if attempt < max_attempts && is_transient(&error) => {
                    let delay = self.backoff(attempt);
                    log::warn!(
                        "attempt {}/{} failed: {}, backoff {}ms",
                        attempt,
                        max_attempts,
                        error,
                        delay.as_millis()
                    );
                    sleep(delay);
                    attempt += 1;
                }
                Err(error) => return Err(RetryFailure { attempts: attempt, error }),
            }
        }
    }
}
