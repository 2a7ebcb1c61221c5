use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::builder::EnhancedClientBuilder;
use super::signals::SignalsSnapshot;
use super::stats::PerformanceTracker;
use crate::cache::{CacheKey, RequestCache};
use crate::error::OperationError;
use crate::middleware::MiddlewarePipeline;
use crate::resilience::{CircuitBreaker, RateLimiter, RetryError, RetryHandler};
use crate::signing::{canonical::canonical_url, RequestSigner};
use crate::transport::{Request, Response, Transport};
use crate::{Error, Result};

/// Identity used for rate limiting when neither the request nor the builder sets one.
pub const DEFAULT_IDENTITY: &str = "default";

/// HTTP client wrapping a [`Transport`] with the full resilience stack.
///
/// Each call flows through, in order: middleware request hooks, the rate
/// limiter, the cache (GET only), the signed retry loop (which consults the
/// circuit breaker before every attempt), the cache store for successful GETs
/// and finally middleware response hooks. Every component is optional.
pub struct EnhancedClient<T> {
    pub(crate) transport: T,
    pub(crate) retry: RetryHandler,
    pub(crate) rate_limiter: Option<Arc<RateLimiter>>,
    pub(crate) cache: Option<Arc<RequestCache<Response>>>,
    pub(crate) signer: Option<RequestSigner>,
    pub(crate) middleware: MiddlewarePipeline,
    pub(crate) stats: PerformanceTracker,
    pub(crate) identity: String,
    pub(crate) timeout: Option<Duration>,
}

impl<T> std::fmt::Debug for EnhancedClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnhancedClient")
            .field("retry", self.retry.config())
            .field("rate_limited", &self.rate_limiter.is_some())
            .field("cached", &self.cache.is_some())
            .field("signed", &self.signer.is_some())
            .field("middleware", &self.middleware)
            .field("identity", &self.identity)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T: Transport> EnhancedClient<T> {
    pub fn builder(transport: T) -> EnhancedClientBuilder<T> {
        EnhancedClientBuilder::new(transport)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stats(&self) -> &PerformanceTracker {
        &self.stats
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.retry.breaker()
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    pub fn cache(&self) -> Option<&Arc<RequestCache<Response>>> {
        self.cache.as_ref()
    }

    /// Guard state for `identity` (or the client's default identity).
    pub fn signals(&self, identity: Option<&str>) -> SignalsSnapshot {
        let identity = identity.unwrap_or(&self.identity);
        SignalsSnapshot {
            rate_limiter: self.rate_limiter.as_ref().map(|l| l.snapshot(identity)),
            circuit_breaker: self.retry.breaker().map(|b| b.snapshot()),
            cache: self.cache.as_ref().map(|c| c.stats()),
        }
    }

    pub async fn get(&self, url: impl Into<String>) -> Result<Response> {
        self.send(Request::get(url)).await
    }

    pub async fn post_json<B: serde::Serialize + ?Sized>(
        &self,
        url: impl Into<String>,
        body: &B,
    ) -> Result<Response> {
        self.send(Request::post(url).with_json(body)?).await
    }

    pub async fn send(&self, request: Request) -> Result<Response> {
        self.send_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`send`](Self::send), returning [`Error::Cancelled`] once `cancel`
    /// fires or the client timeout elapses.
    pub async fn send_with_cancel(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let started = Instant::now();
        let request = self.middleware.run_request(request).await;
        let endpoint = format!("{} {}", request.method, canonical_url(&request.url));

        match self.dispatch(&request, cancel).await {
            Ok((response, cache_hit)) => {
                let response = self.middleware.run_response(&request, response).await;
                self.stats
                    .record(&endpoint, started.elapsed(), true, cache_hit);
                Ok(response)
            }
            Err(err) => {
                self.middleware.run_error(&request, &err).await;
                self.stats.record(&endpoint, started.elapsed(), false, false);
                Err(err)
            }
        }
    }

    /// Rate limit, cache lookup, retried transport call and cache store.
    /// The flag is `true` when the response came from the cache.
    async fn dispatch(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<(Response, bool)> {
        let identity = request.identity.as_deref().unwrap_or(&self.identity);
        if let Some(limiter) = &self.rate_limiter {
            limiter.admit_or_err(identity)?;
        }

        let cache_slot = self.cache_slot(request);
        if let Some((cache, key)) = &cache_slot {
            if let Some(hit) = cache.get_by_key(key) {
                trace!(url = %request.url, "served from cache");
                return Ok((hit, true));
            }
        }

        let response = self.call_with_retry(request, cancel).await?;

        if let Some((cache, key)) = cache_slot {
            if response.is_success() {
                cache.set_by_key(key, response.clone(), None);
            }
        }
        Ok((response, false))
    }

    fn cache_slot(&self, request: &Request) -> Option<(&Arc<RequestCache<Response>>, CacheKey)> {
        let cache = self.cache.as_ref().filter(|_| request.is_get())?;
        let key = cache.key_for(
            &request.method,
            &request.url,
            &request.params,
            request.body.as_deref(),
        );
        Some((cache, key))
    }

    async fn call_with_retry(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let retried = self
            .retry
            .execute_with_cancel(move || self.attempt(request), cancel);

        let outcome = match self.timeout {
            Some(limit) => {
                tokio::select! {
                    outcome = retried => outcome,
                    _ = tokio::time::sleep(limit) => {
                        debug!(url = %request.url, timeout_ms = limit.as_millis() as u64, "client timeout elapsed");
                        Err(RetryError::Cancelled)
                    }
                }
            }
            None => retried.await,
        };
        outcome.map_err(Error::from)
    }

    /// One transport attempt; each attempt is signed afresh so retries carry a
    /// new timestamp and nonce.
    async fn attempt(&self, request: &Request) -> std::result::Result<Response, OperationError> {
        match &self.signer {
            Some(signer) => {
                let mut signed = request.clone();
                let headers = signer.sign(
                    &signed.method,
                    &signed.url,
                    &signed.headers,
                    signed.body_bytes(),
                );
                signed.headers.extend(headers.to_headers());
                self.transport.send(&signed).await
            }
            None => self.transport.send(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted outcomes and records every request it sees.
    #[derive(Default)]
    struct Scripted {
        outcomes: Mutex<VecDeque<std::result::Result<Response, OperationError>>>,
        seen: Mutex<Vec<Request>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<std::result::Result<Response, OperationError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: &Request) -> std::result::Result<Response, OperationError> {
            self.seen.lock().unwrap().push(request.clone());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Response::new(200, "default")))
        }
    }

    fn quick_retry() -> RetryConfig {
        RetryConfig::new()
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn caches_successful_gets_only() {
        let transport = Scripted::new(vec![]);
        let client = EnhancedClient::builder(transport.clone())
            .cache(CacheConfig::new())
            .build()
            .unwrap();

        client.get("/items").await.unwrap();
        client.get("/items").await.unwrap();
        assert_eq!(transport.calls(), 1);

        client.send(Request::post("/items")).await.unwrap();
        client.send(Request::post("/items")).await.unwrap();
        assert_eq!(transport.calls(), 3);

        let stats = client.stats().endpoint("GET /items").unwrap();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn rate_limit_rejects_before_transport() {
        let transport = Scripted::new(vec![]);
        let client = EnhancedClient::builder(transport.clone())
            .rate_limit(RateLimiterConfig::new().with_rate(0.001).with_capacity(1))
            .build()
            .unwrap();

        client.get("/a").await.unwrap();
        let err = client.get("/a").await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { ref identifier, .. } if identifier == DEFAULT_IDENTITY));
        assert_eq!(transport.calls(), 1);

        // A different identity has its own bucket.
        client
            .send(Request::get("/a").with_identity("other"))
            .await
            .unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn retries_and_signs_every_attempt() {
        let transport = Scripted::new(vec![
            Err(OperationError::http(503, "busy")),
            Ok(Response::new(200, "ok")),
        ]);
        let client = EnhancedClient::builder(transport.clone())
            .retry(quick_retry())
            .signer(RequestSigner::new("secret").unwrap())
            .build()
            .unwrap();

        let resp = client.get("/signed").await.unwrap();
        assert_eq!(resp.text(), "ok");

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].headers.contains_key(crate::signing::SIGNATURE_HEADER));
        assert_ne!(
            seen[0].headers[crate::signing::NONCE_HEADER],
            seen[1].headers[crate::signing::NONCE_HEADER]
        );
    }

    #[tokio::test]
    async fn open_breaker_short_circuits() {
        let transport = Scripted::new(vec![
            Err(OperationError::http(500, "boom")),
            Err(OperationError::http(500, "boom")),
        ]);
        let client = EnhancedClient::builder(transport.clone())
            .retry(quick_retry().with_max_attempts(1))
            .circuit_breaker(CircuitBreakerConfig::new().with_failure_threshold(2))
            .build()
            .unwrap();

        assert!(matches!(client.get("/x").await, Err(Error::Operation(_))));
        assert!(matches!(client.get("/x").await, Err(Error::Operation(_))));
        assert!(matches!(client.get("/x").await, Err(Error::CircuitOpen { .. })));
        assert_eq!(transport.calls(), 2);

        let signals = client.signals(None);
        assert_eq!(
            signals.circuit_breaker.unwrap().state,
            crate::resilience::CircuitState::Open
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_backoff() {
        let transport = Scripted::new(vec![
            Err(OperationError::http(503, "busy")),
            Err(OperationError::http(503, "busy")),
        ]);
        let client = EnhancedClient::builder(transport.clone())
            .retry(
                RetryConfig::new()
                    .with_base_delay(Duration::from_secs(10))
                    .with_jitter(false),
            )
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap();

        let err = client.get("/slow").await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.stats().endpoint("GET /slow").unwrap().failures, 1);
    }

    /// Fails once, hangs on the next call, then recovers.
    struct FailThenHang {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Transport for FailThenHang {
        async fn send(&self, _request: &Request) -> std::result::Result<Response, OperationError> {
            match self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
                0 => Err(OperationError::http(500, "boom")),
                1 => std::future::pending().await,
                _ => Ok(Response::new(200, "back")),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_trial_does_not_wedge_breaker() {
        let client = EnhancedClient::builder(FailThenHang {
            calls: std::sync::atomic::AtomicU32::new(0),
        })
        .retry(quick_retry().with_max_attempts(1))
        .circuit_breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_recovery_timeout(Duration::from_millis(50))
                .with_success_threshold(1),
        )
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();

        assert!(matches!(client.get("/flaky").await, Err(Error::Operation(_))));
        assert!(matches!(client.get("/flaky").await, Err(Error::CircuitOpen { .. })));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(matches!(client.get("/flaky").await, Err(Error::Cancelled)));

        let resp = client.get("/flaky").await.unwrap();
        assert_eq!(resp.text(), "back");
        assert_eq!(
            client.circuit_breaker().unwrap().state(),
            crate::resilience::CircuitState::Closed
        );
    }
}
