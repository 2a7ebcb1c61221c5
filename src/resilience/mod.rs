//! # Resilience Primitives Module
//!
//! Opt-in guards around a single logical HTTP operation.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Three-state breaker that fails fast during outages |
//! | [`rate_limiter`] | Per-identifier token bucket admission |
//! | [`retry`] | Exponential backoff retry loop with breaker integration |
//!
//! ## Circuit Breaker
//!
//! - **Closed**: normal operation, failures accumulate and successes heal them
//! - **Open**: threshold reached, calls fail fast until the recovery timeout passes
//! - **Half-Open**: trial calls decide between closing and reopening
//!
//! ```rust
//! use sdk_resilience::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::new()
//!     .with_failure_threshold(5)
//!     .with_recovery_timeout(Duration::from_secs(30));
//! let breaker = CircuitBreaker::new(config).unwrap();
//!
//! if breaker.can_execute() {
//!     // Make API call...
//!     breaker.record_success();
//! }
//!
//! // A permit gives its half-open trial slot back if it is dropped unreported.
//! if let Some(permit) = breaker.acquire() {
//!     permit.record_success();
//! };
//! ```
//!
//! ## Rate Limiter
//!
//! ```rust
//! use sdk_resilience::resilience::{RateLimiter, RateLimiterConfig};
//!
//! let config = RateLimiterConfig::new()
//!     .with_capacity(100)
//!     .with_rate(10.0); // 10 tokens per second
//! let limiter = RateLimiter::new(config).unwrap();
//!
//! if limiter.admit("tenant-a") {
//!     // Proceed with request...
//! }
//! ```
//!
//! ## Retry
//!
//! ```rust
//! use sdk_resilience::error::OperationError;
//! use sdk_resilience::resilience::{RetryConfig, RetryHandler};
//! use std::time::Duration;
//!
//! let handler = RetryHandler::new(
//!     RetryConfig::new()
//!         .with_max_attempts(3)
//!         .with_base_delay(Duration::from_millis(1)),
//! )
//! .unwrap();
//!
//! let mut calls = 0;
//! let result = handler.execute_blocking(|| {
//!     calls += 1;
//!     if calls < 2 {
//!         Err(OperationError::http(503, "unavailable"))
//!     } else {
//!         Ok("ok")
//!     }
//! });
//! assert_eq!(result.unwrap(), "ok");
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
pub use retry::{RetryConfig, RetryError, RetryHandler};
