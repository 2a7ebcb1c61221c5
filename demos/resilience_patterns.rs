//! Resilience Patterns Demo
//!
//! Walks through each component on its own and then composed in a client:
//! - Circuit breaker for fault isolation
//! - Per-identity rate limiting
//! - Retry with exponential backoff
//! - Response caching
//!
//! Usage:
//!   RUST_LOG=sdk_resilience=debug cargo run --example resilience_patterns

use async_trait::async_trait;
use sdk_resilience::cache::{CacheConfig, RequestCache};
use sdk_resilience::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig, RetryConfig,
    RetryHandler,
};
use sdk_resilience::transport::{Request, Response, Transport};
use sdk_resilience::{EnhancedClient, OperationError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> sdk_resilience::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== SDK Resilience Patterns Demo ===\n");

    demo_circuit_breaker()?;
    demo_rate_limiter()?;
    demo_retry().await?;
    demo_cache()?;
    demo_client().await?;
    Ok(())
}

fn demo_circuit_breaker() -> sdk_resilience::Result<()> {
    println!("--- Circuit Breaker ---\n");

    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new()
            .with_failure_threshold(3)
            .with_recovery_timeout(Duration::from_millis(200)),
    )?;

    for i in 1..=5 {
        if breaker.can_execute() {
            println!("Request {}: allowed (simulating failure)", i);
            breaker.record_failure();
        } else {
            println!("Request {}: BLOCKED, retry in {:?}", i, breaker.retry_in());
        }
    }

    std::thread::sleep(Duration::from_millis(250));
    if breaker.can_execute() {
        println!("After recovery timeout: trial call admitted ({:?})", breaker.state());
        breaker.record_success();
    }
    println!("Snapshot: {:?}\n", breaker.snapshot());
    Ok(())
}

fn demo_rate_limiter() -> sdk_resilience::Result<()> {
    println!("--- Rate Limiter ---\n");

    let limiter = RateLimiter::new(RateLimiterConfig::new().with_rate(2.0).with_capacity(3))?;
    for i in 1..=5 {
        let verdict = if limiter.admit("alice") { "admitted" } else { "denied" };
        println!("alice request {}: {}", i, verdict);
    }
    println!("bob request 1: admitted = {}", limiter.admit("bob"));
    println!(
        "alice must wait {:?} for the next token\n",
        limiter.time_until_next("alice")
    );
    Ok(())
}

async fn demo_retry() -> sdk_resilience::Result<()> {
    println!("--- Retry ---\n");

    let handler = RetryHandler::new(
        RetryConfig::new()
            .with_max_attempts(4)
            .with_base_delay(Duration::from_millis(50)),
    )?;
    let calls = AtomicU32::new(0);

    let value = handler
        .execute(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    println!("attempt {}: 503", n);
                    Err(OperationError::http(503, "service unavailable"))
                } else {
                    println!("attempt {}: ok", n);
                    Ok(n)
                }
            }
        })
        .await?;
    println!("succeeded after {} attempts\n", value);
    Ok(())
}

fn demo_cache() -> sdk_resilience::Result<()> {
    println!("--- Cache ---\n");

    let cache: RequestCache<String> =
        RequestCache::new(CacheConfig::new().with_ttl(Duration::from_secs(60)).with_max_size(2))?;
    cache.set("GET", "/users/1", "alice".to_string(), None, &[], None);
    cache.set("GET", "/users/2", "bob".to_string(), None, &[], None);
    cache.set("GET", "/users/3", "carol".to_string(), None, &[], None);

    println!("/users/3 -> {:?}", cache.get("GET", "/users/3", &[], None));
    println!("size = {}, stats = {:?}\n", cache.size(), cache.stats());
    Ok(())
}

/// In-process stand-in for a flaky upstream: every third call fails.
struct FlakyUpstream {
    calls: AtomicU32,
}

#[async_trait]
impl Transport for FlakyUpstream {
    async fn send(&self, request: &Request) -> Result<Response, OperationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n % 3 == 0 {
            Err(OperationError::http(502, "bad gateway"))
        } else {
            Ok(Response::new(200, format!("{} {} #{}", request.method, request.url, n)))
        }
    }
}

async fn demo_client() -> sdk_resilience::Result<()> {
    println!("--- Enhanced Client ---\n");

    let client = EnhancedClient::builder(FlakyUpstream {
        calls: AtomicU32::new(0),
    })
    .retry(RetryConfig::new().with_base_delay(Duration::from_millis(20)))
    .circuit_breaker(CircuitBreakerConfig::new())
    .rate_limit_rps(50.0)
    .cache(CacheConfig::new())
    .build()?;

    for path in ["/v1/a", "/v1/b", "/v1/a", "/v1/c", "/v1/d"] {
        let resp = client.get(path).await?;
        println!("{} -> {}", path, resp.text());
    }

    for (endpoint, stats) in client.stats().snapshot() {
        println!(
            "{}: calls={} cache_hits={} avg={:?}",
            endpoint,
            stats.calls,
            stats.cache_hits,
            stats.average_latency()
        );
    }
    Ok(())
}
