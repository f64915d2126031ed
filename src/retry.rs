//! Retry helper for convergence checks.
//!
//! Setup steps never retry; only the "wait until the external system agrees"
//! checks (pods ready, federation healthy, connection through the gateway) go
//! through here.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Randomise each delay between 0.5x and 1.5x
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// `attempts` tries spaced exactly `wait` apart.
    pub fn fixed(attempts: u32, wait: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: wait,
            max_delay: wait,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Fixed-interval retries covering roughly `timeout`.
    pub fn timer(timeout: Duration, wait: Duration) -> Self {
        let attempts = (timeout.as_millis() / wait.as_millis().max(1)).max(1);
        Self::fixed(u32::try_from(attempts).unwrap_or(u32::MAX), wait)
    }

    /// Upper bound of the time spent sleeping between attempts.
    pub fn budget(&self) -> Duration {
        if self.max_attempts == 0 {
            return Duration::MAX;
        }
        let mut total = Duration::ZERO;
        let mut delay = self.initial_delay;
        for _ in 1..self.max_attempts {
            total += delay;
            delay = next_delay(self, delay);
        }
        total
    }
}

fn next_delay(config: &RetryConfig, delay: Duration) -> Duration {
    Duration::from_secs_f64(
        (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
    )
}

/// Runs `operation` until it succeeds or the attempts are exhausted, returning
/// the last error in the latter case.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                debug!(operation = %operation_name, attempt, "operation succeeded");
                return Ok(result);
            }
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "operation failed after max retries"
                    );
                    return Err(e);
                }

                let sleep_for = if config.jitter {
                    let factor = rand::thread_rng().gen_range(0.5..1.5);
                    Duration::from_secs_f64(delay.as_secs_f64() * factor)
                } else {
                    delay
                };

                debug!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = sleep_for.as_millis() as u64,
                    "operation failed, retrying"
                );

                tokio::time::sleep(sleep_for).await;
                delay = next_delay(config, delay);
            }
        }
    }
}
