use crate::{Error, ErrorContext, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub identifier: String,
    pub rate: f64,
    pub capacity: f64,
    pub tokens: f64,
    /// Estimated wait time until a token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Tokens added per second.
    pub rate: f64,
    /// Maximum burst size (tokens).
    pub capacity: f64,
}

impl RateLimiterConfig {
    pub fn new() -> Self {
        Self {
            rate: 10.0,
            capacity: 10.0,
        }
    }

    /// Config with a burst of one second worth of tokens (at least 1).
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps <= 0.0 {
            return None;
        }
        Some(Self {
            rate: rps,
            capacity: rps.max(1.0),
        })
    }

    /// Set the maximum tokens (burst size)
    pub fn with_capacity(mut self, tokens: u32) -> Self {
        self.capacity = tokens as f64;
        self
    }

    /// Set the refill rate (tokens per second)
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let check = |value: f64, field: &str| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(Error::configuration_with_context(
                    format!("{} must be a positive finite number", field),
                    ErrorContext::new()
                        .with_field_path(format!("rate_limit.{}", field))
                        .with_details(format!("got {}", value))
                        .with_source("rate_limiter"),
                ))
            }
        };
        check(self.rate, "rate")?;
        check(self.capacity, "capacity")?;
        // A bucket that can never hold a whole token would deny forever.
        if self.capacity < 1.0 {
            return Err(Error::configuration_with_context(
                "capacity must be at least 1",
                ErrorContext::new()
                    .with_field_path("rate_limit.capacity")
                    .with_details(format!("got {}", self.capacity))
                    .with_source("rate_limiter"),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-identifier token-bucket rate limiter.
///
/// Every identifier owns an independent bucket that starts full. Refill is lazy:
/// tokens are topped up from elapsed time whenever the bucket is touched, so idle
/// identifiers cost nothing but a map entry (see [`prune_idle`](Self::prune_idle)).
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            buckets: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch the bucket for `identifier`, refilled up to `now`.
    fn refilled<'a>(
        cfg: &RateLimiterConfig,
        buckets: &'a mut HashMap<String, Bucket>,
        identifier: &str,
        now: Instant,
    ) -> &'a mut Bucket {
        let bucket = buckets
            .entry(identifier.to_string())
            .or_insert_with(|| Bucket {
                tokens: cfg.capacity,
                last_refill: now,
            });
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * cfg.rate).min(cfg.capacity);
        bucket.last_refill = now;
        bucket
    }

    fn wait_for(cfg: &RateLimiterConfig, tokens: f64) -> Duration {
        if tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - tokens) / cfg.rate)
        }
    }

    /// Take one token for `identifier` if available.
    pub fn admit(&self, identifier: &str) -> bool {
        let mut buckets = self.lock();
        let bucket = Self::refilled(&self.cfg, &mut buckets, identifier, Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            debug!(identifier, tokens = bucket.tokens, "rate limit denied");
            false
        }
    }

    /// Like [`admit`](Self::admit) but reports denial with a retry-after hint.
    pub fn admit_or_err(&self, identifier: &str) -> Result<()> {
        let mut buckets = self.lock();
        let bucket = Self::refilled(&self.cfg, &mut buckets, identifier, Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let retry_after = Self::wait_for(&self.cfg, bucket.tokens);
            debug!(
                identifier,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit denied"
            );
            Err(Error::RateLimited {
                identifier: identifier.to_string(),
                retry_after,
            })
        }
    }

    /// Time until `identifier` would be admitted; zero if a token is available now.
    pub fn time_until_next(&self, identifier: &str) -> Duration {
        let mut buckets = self.lock();
        let bucket = Self::refilled(&self.cfg, &mut buckets, identifier, Instant::now());
        Self::wait_for(&self.cfg, bucket.tokens)
    }

    /// Acquire one token, sleeping until one is available.
    pub async fn acquire(&self, identifier: &str) {
        loop {
            let wait = {
                let mut buckets = self.lock();
                let bucket = Self::refilled(&self.cfg, &mut buckets, identifier, Instant::now());
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Self::wait_for(&self.cfg, bucket.tokens)
            };
            tokio::time::sleep(wait).await;
        }
    }

    pub fn snapshot(&self, identifier: &str) -> RateLimiterSnapshot {
        let mut buckets = self.lock();
        let bucket = Self::refilled(&self.cfg, &mut buckets, identifier, Instant::now());
        let wait = Self::wait_for(&self.cfg, bucket.tokens);
        RateLimiterSnapshot {
            identifier: identifier.to_string(),
            rate: self.cfg.rate,
            capacity: self.cfg.capacity,
            tokens: bucket.tokens,
            estimated_wait_ms: (!wait.is_zero()).then(|| wait.as_millis() as u64),
        }
    }

    /// Drop identifiers whose bucket has refilled to capacity.
    ///
    /// A full bucket behaves exactly like an unseen identifier, so this only
    /// reclaims memory. Returns the number of entries removed.
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.lock();
        let before = buckets.len();
        let cfg = &self.cfg;
        buckets.retain(|_, b| {
            let elapsed = now.saturating_duration_since(b.last_refill).as_secs_f64();
            b.tokens + elapsed * cfg.rate < cfg.capacity
        });
        before - buckets.len()
    }

    /// Number of identifiers currently tracked.
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }
}
