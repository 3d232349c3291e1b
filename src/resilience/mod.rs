//! Resilience primitives guarding external calls
//!
//! Retry with bounded exponential backoff, per-dependency circuit breakers,
//! and a sliding-window rate limiter. These compose around the backend and
//! chain clients; none of them know anything about the domain.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use rate_limiter::RateLimiter;
pub use retry::{with_retry, with_retry_if, RetryConfig};
