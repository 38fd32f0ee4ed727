//! Exponential retry schedule for upstream forecast calls.
//!
//! The delay doubles from the base on every failed attempt (1s, 2s, 4s with
//! the default base) and is only slept between attempts, never after the
//! last one.

use crate::config::ProviderConfig;
use crate::PlannerError;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.backoff_base_ms))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after `failed_attempts` failures (1-based).
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        self.base.saturating_mul(1u32 << exponent)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. The last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, PlannerError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, PlannerError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        target_call = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "forecast call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
