//! # sdk-resilience
//!
//! Resilience layer for HTTP SDK clients: per-identity rate limiting, response
//! caching, circuit breaking, retries with exponential backoff and HMAC request
//! signing, composed by an [`EnhancedClient`] around a pluggable
//! [`Transport`](transport::Transport).
//!
//! Every component is an independent, thread-safe object that can also be used
//! on its own.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sdk_resilience::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
//! use sdk_resilience::cache::CacheConfig;
//! use sdk_resilience::transport::ReqwestTransport;
//! use sdk_resilience::EnhancedClient;
//!
//! #[tokio::main]
//! async fn main() -> sdk_resilience::Result<()> {
//!     let transport = ReqwestTransport::new()?.with_base_url("https://api.example.com");
//!     let client = EnhancedClient::builder(transport)
//!         .retry(RetryConfig::new().with_max_attempts(3))
//!         .circuit_breaker(CircuitBreakerConfig::new())
//!         .rate_limit_rps(10.0)
//!         .cache(CacheConfig::new())
//!         .build()?;
//!
//!     let response = client.get("/v1/items").await?;
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Rate limiter, circuit breaker and retry handler |
//! | [`cache`] | TTL request cache and cache keys |
//! | [`signing`] | HMAC request signing and verification |
//! | [`client`] | Enhanced client, builder and call statistics |
//! | [`middleware`] | Request/response hooks |
//! | [`transport`] | Single-attempt HTTP seam and reqwest implementation |
//! | [`config`] | YAML and environment configuration |

pub mod cache;
pub mod client;
pub mod config;
pub mod middleware;
pub mod resilience;
pub mod signing;
pub mod transport;

pub use client::{EnhancedClient, EnhancedClientBuilder};
pub use config::ResilienceConfig;
pub use error::{Classify, FailureKind, OperationError, TransportKind};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
