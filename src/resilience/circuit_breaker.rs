//! Circuit breaker for external dependencies
//!
//! Stops calling a failing dependency until it has had time to recover.
//! One instance per named dependency, shared via `Arc` for the process
//! lifetime.

use crate::error::{AgentError, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Failure threshold exceeded - calls rejected
    Open,
    /// Recovery probe - calls allowed, watched closely
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit
    pub failure_threshold: u32,
    /// Time after the last failure before a half-open probe is allowed
    pub reset_timeout: Duration,
    /// Consecutive half-open successes required to close
    pub half_open_successes_to_close: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_millis(60_000),
            half_open_successes_to_close: 3,
        }
    }
}

/// Circuit breaker guarding one named dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failures: AtomicU32,
    half_open_successes: AtomicU32,
    last_failure_at: RwLock<Option<Instant>>,
    total_trips: AtomicU64,
    last_trip_at: RwLock<Option<DateTime<Utc>>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(CircuitState::Closed),
            failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            last_failure_at: RwLock::new(None),
            total_trips: AtomicU64::new(0),
            last_trip_at: RwLock::new(None),
        }
    }

    /// Create with default configuration
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Get current state (after applying open→half-open recovery)
    pub async fn state(&self) -> CircuitState {
        self.maybe_recover().await;
        *self.state.read().await
    }

    /// Run `op` through the breaker.
    ///
    /// Rejected immediately with `CircuitOpen` while open; success/failure of
    /// the call drives the state transitions.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.maybe_recover().await;

        if *self.state.read().await == CircuitState::Open {
            debug!("circuit '{}' rejecting call (open)", self.name);
            return Err(AgentError::CircuitOpen {
                name: self.name.clone(),
            });
        }

        match op().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(e) => {
                self.on_failure().await;
                Err(e)
            }
        }
    }

    async fn maybe_recover(&self) {
        let is_open = *self.state.read().await == CircuitState::Open;
        if !is_open {
            return;
        }
        let elapsed = self
            .last_failure_at
            .read()
            .await
            .map(|at| at.elapsed())
            .unwrap_or_default();
        if elapsed >= self.config.reset_timeout {
            let mut state = self.state.write().await;
            if *state == CircuitState::Open {
                *state = CircuitState::HalfOpen;
                self.half_open_successes.store(0, Ordering::SeqCst);
                info!("circuit '{}' transitioning to half-open", self.name);
            }
        }
    }

    async fn on_success(&self) {
        let state = *self.state.read().await;
        match state {
            CircuitState::Closed => {
                self.failures.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.half_open_successes_to_close {
                    let mut state = self.state.write().await;
                    *state = CircuitState::Closed;
                    self.failures.store(0, Ordering::SeqCst);
                    self.half_open_successes.store(0, Ordering::SeqCst);
                    info!("circuit '{}' closed - normal operation resumed", self.name);
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn on_failure(&self) {
        *self.last_failure_at.write().await = Some(Instant::now());

        let state = *self.state.read().await;
        match state {
            CircuitState::HalfOpen => self.trip("half-open probe failed").await,
            CircuitState::Closed => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.trip("failure threshold reached").await;
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn trip(&self, reason: &str) {
        let mut state = self.state.write().await;
        if *state != CircuitState::Open {
            *state = CircuitState::Open;
            self.half_open_successes.store(0, Ordering::SeqCst);
            self.total_trips.fetch_add(1, Ordering::SeqCst);
            *self.last_trip_at.write().await = Some(Utc::now());
            warn!("circuit '{}' TRIPPED: {}", self.name, reason);
        }
    }

    /// Snapshot for monitoring
    pub async fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            name: self.name.clone(),
            state: *self.state.read().await,
            consecutive_failures: self.failures.load(Ordering::SeqCst),
            total_trips: self.total_trips.load(Ordering::SeqCst),
            last_trip_at: *self.last_trip_at.read().await,
        }
    }
}

/// Statistics for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_trips: u64,
    pub last_trip_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_err() -> AgentError {
        AgentError::Service {
            endpoint: "/quick-deploy".into(),
            status: 500,
            message: "boom".into(),
        }
    }

    async fn fail(cb: &CircuitBreaker) {
        let _ = cb.execute(|| async { Err::<(), _>(service_err()) }).await;
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<()> {
        cb.execute(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_opens_after_exactly_threshold_failures() {
        let cb = CircuitBreaker::with_defaults("backend");

        for _ in 0..4 {
            fail(&cb).await;
        }
        assert_eq!(cb.state().await, CircuitState::Closed);

        fail(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_rejects_without_calling_op() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("backend", config);
        fail(&cb).await;

        let called = std::sync::atomic::AtomicBool::new(false);
        let result = cb
            .execute(|| async {
                called.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            AgentError::CircuitOpen { .. }
        ));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::with_defaults("backend");

        for _ in 0..4 {
            fail(&cb).await;
        }
        succeed(&cb).await.unwrap();

        for _ in 0..4 {
            fail(&cb).await;
        }
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_after_reset_timeout_then_closes_on_three_successes() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(20),
            half_open_successes_to_close: 3,
        };
        let cb = CircuitBreaker::new("backend", config);

        fail(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_immediately() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(10),
            half_open_successes_to_close: 3,
        };
        let cb = CircuitBreaker::new("backend", config);

        fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        succeed(&cb).await.unwrap();
        fail(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert_eq!(cb.stats().await.total_trips, 2);
    }

    #[tokio::test]
    async fn test_stays_open_before_reset_timeout() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
            half_open_successes_to_close: 3,
        };
        let cb = CircuitBreaker::new("backend", config);

        fail(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(matches!(
            succeed(&cb).await.unwrap_err(),
            AgentError::CircuitOpen { .. }
        ));
    }
}
