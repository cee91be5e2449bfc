//! Exponential-backoff retry with jitter.

use crate::errors::Retryable;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// How many times and how patiently to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay before retry number `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff randomized into `[0.5 * delay, delay]`.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        jitter(self.backoff(attempt))
    }
}

/// Scales `delay` by a random factor in `[0.5, 1.0]`.
pub fn jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
    delay.mul_f64(factor)
}

/// Runs `op`, retrying retryable failures per `policy`.
///
/// Non-retryable errors return immediately. A `retry_after` carried by the
/// error replaces the computed delay. After the last retry the final error
/// is returned.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                tracing::debug!("{}: non-retryable error: {}", label, e);
                return Err(e);
            }
            Err(e) if attempt >= policy.max_retries => {
                tracing::warn!("{}: giving up after {} retries: {}", label, attempt, e);
                return Err(e);
            }
            Err(e) => {
                attempt += 1;
                let delay = e
                    .retry_after()
                    .unwrap_or_else(|| policy.jittered_backoff(attempt));
                tracing::warn!(
                    "{}: attempt {} failed ({}), retrying in {:?}",
                    label,
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
