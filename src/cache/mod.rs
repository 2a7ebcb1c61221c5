//! # Request Caching Module
//!
//! Memoizes idempotent responses so repeated GETs skip the network.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RequestCache`] | TTL and capacity bounded in-memory store |
//! | [`CacheConfig`] | Default TTL and maximum entry count |
//! | [`CacheKey`] | Digest of method, URL, sorted params and body |
//! | [`CacheStats`] | Hit/miss/eviction counters |
//!
//! ## Example
//!
//! ```rust
//! use sdk_resilience::cache::{CacheConfig, RequestCache};
//! use std::time::Duration;
//!
//! let cache: RequestCache<String> = RequestCache::new(
//!     CacheConfig::new()
//!         .with_ttl(Duration::from_secs(60))
//!         .with_max_size(1000),
//! )
//! .unwrap();
//!
//! cache.set("GET", "https://api.example.com/items", "[]".to_string(), None, &[], None);
//! assert!(cache.get("GET", "https://api.example.com/items", &[], None).is_some());
//! ```

mod key;
mod store;

pub use key::{CacheKey, CacheKeyGenerator};
pub use store::{CacheConfig, CacheStats, RequestCache};
