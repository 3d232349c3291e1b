//! Bounded exponential backoff retry
//!
//! Wraps fallible async operations with a fixed backoff schedule
//! (`min(initial * factor^(attempt-1), max)`, no jitter) and an optional
//! hard timeout raced against each attempt.

use crate::error::{AgentError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay_ms: u64,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Upper bound on any single delay
    pub max_delay_ms: u64,
    /// Hard per-attempt deadline; None disables the race
    pub timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            timeout_ms: None,
        }
    }
}

impl RetryConfig {
    /// Delay to sleep after the given 1-based attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let delay = (self.initial_delay_ms as f64 * factor) as u64;
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Retry `op` with the default predicate (`AgentError::is_retryable`).
pub async fn with_retry<T, F, Fut>(name: &str, config: &RetryConfig, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(name, config, op, AgentError::is_retryable).await
}

/// Retry `op` while `retry_if` approves the failure.
///
/// The last error is returned unchanged once attempts are exhausted or the
/// predicate declines a retry.
pub async fn with_retry_if<T, F, Fut, P>(
    name: &str,
    config: &RetryConfig,
    op: F,
    retry_if: P,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&AgentError) -> bool,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match config.timeout_ms {
            Some(ms) => match timeout(Duration::from_millis(ms), op()).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout {
                    operation: name.to_string(),
                    elapsed_ms: ms,
                }),
            },
            None => op().await,
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", name, attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= config.max_attempts || !retry_if(&e) {
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{} attempt {} failed: {}. Retrying in {:?}",
                    name, attempt, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
