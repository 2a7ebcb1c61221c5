use std::sync::Arc;
use std::time::Duration;

use super::core::{EnhancedClient, DEFAULT_IDENTITY};
use super::stats::PerformanceTracker;
use crate::cache::{CacheConfig, CacheKeyGenerator, RequestCache};
use crate::config::{ResilienceConfig, SigningConfig};
use crate::middleware::{Middleware, MiddlewarePipeline};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig, RetryConfig,
    RetryHandler,
};
use crate::signing::RequestSigner;
use crate::transport::{Response, Transport};
use crate::Result;

/// Builder for [`EnhancedClient`].
///
/// Components are either described by config (built and validated in
/// [`build`](Self::build)) or injected ready-made, which lets several clients
/// share one breaker, limiter or cache.
pub struct EnhancedClientBuilder<T> {
    transport: T,
    retry: RetryConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    breaker_config: Option<CircuitBreakerConfig>,
    rate_limiter: Option<Arc<RateLimiter>>,
    rate_limit_config: Option<RateLimiterConfig>,
    cache: Option<Arc<RequestCache<Response>>>,
    cache_config: Option<CacheConfig>,
    cache_salt: Option<String>,
    signer: Option<RequestSigner>,
    middleware: MiddlewarePipeline,
    identity: String,
    timeout: Option<Duration>,
}

impl<T: Transport> EnhancedClientBuilder<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            retry: RetryConfig::default(),
            breaker: None,
            breaker_config: None,
            rate_limiter: None,
            rate_limit_config: None,
            cache: None,
            cache_config: None,
            cache_salt: None,
            signer: None,
            middleware: MiddlewarePipeline::new(),
            identity: DEFAULT_IDENTITY.to_string(),
            timeout: None,
        }
    }

    /// Apply every section of a [`ResilienceConfig`].
    ///
    /// Signing needs a secret, so the `signing` section is only used through
    /// [`signing_secret`](Self::signing_secret).
    pub fn config(mut self, config: &ResilienceConfig) -> Self {
        self.retry = config.retry.clone();
        self.breaker_config = config.circuit_breaker.clone();
        self.rate_limit_config = config.rate_limit.clone();
        self.cache_config = config.cache.clone();
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = Some(config);
        self
    }

    /// Share an existing breaker.
    pub fn shared_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limit_config = Some(config);
        self
    }

    /// Token bucket of `rps` requests per second; ignored unless positive and finite.
    pub fn rate_limit_rps(mut self, rps: f64) -> Self {
        if let Some(cfg) = RateLimiterConfig::from_rps(rps) {
            self.rate_limit_config = Some(cfg);
        }
        self
    }

    pub fn shared_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache_config = Some(config);
        self
    }

    /// Salt mixed into cache keys of a cache built from config.
    pub fn cache_salt(mut self, salt: impl Into<String>) -> Self {
        self.cache_salt = Some(salt.into());
        self
    }

    pub fn shared_cache(mut self, cache: Arc<RequestCache<Response>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn signer(mut self, signer: RequestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Build a signer from `secret` and a [`SigningConfig`].
    pub fn signing_secret(
        mut self,
        secret: impl AsRef<[u8]>,
        config: &SigningConfig,
    ) -> Result<Self> {
        let mut signer = RequestSigner::with_algorithm(secret, config.algorithm)?;
        if let Some(prefix) = &config.signed_header_prefix {
            signer = signer.with_signed_header_prefix(prefix.clone());
        }
        self.signer = Some(signer);
        Ok(self)
    }

    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Default rate limiting identity (API key, user or tenant).
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Overall deadline per call, covering every attempt and backoff.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<EnhancedClient<T>> {
        let breaker = match (self.breaker, self.breaker_config) {
            (Some(shared), _) => Some(shared),
            (None, Some(cfg)) => Some(Arc::new(CircuitBreaker::new(cfg)?)),
            (None, None) => None,
        };
        let mut retry = RetryHandler::new(self.retry)?;
        if let Some(breaker) = breaker {
            retry = retry.with_breaker(breaker);
        }

        let rate_limiter = match (self.rate_limiter, self.rate_limit_config) {
            (Some(shared), _) => Some(shared),
            (None, Some(cfg)) => Some(Arc::new(RateLimiter::new(cfg)?)),
            (None, None) => None,
        };

        let cache = match (self.cache, self.cache_config) {
            (Some(shared), _) => Some(shared),
            (None, Some(cfg)) => {
                let mut cache = RequestCache::new(cfg)?;
                if let Some(salt) = self.cache_salt {
                    cache = cache.with_key_generator(CacheKeyGenerator::new().with_salt(salt));
                }
                Some(Arc::new(cache))
            }
            (None, None) => None,
        };

        Ok(EnhancedClient {
            transport: self.transport,
            retry,
            rate_limiter,
            cache,
            signer: self.signer,
            middleware: self.middleware,
            stats: PerformanceTracker::new(),
            identity: self.identity,
            timeout: self.timeout,
        })
    }
}
