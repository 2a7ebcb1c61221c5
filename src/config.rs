//! Aggregated configuration for the resilience layer.
//!
//! Loaded from YAML and/or overridden from the environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SDK_RETRY_MAX_ATTEMPTS` | `retry.max_attempts` |
//! | `SDK_RETRY_BASE_DELAY_MS` | `retry.base_delay` |
//! | `SDK_RETRY_MAX_DELAY_MS` | `retry.max_delay` |
//! | `SDK_RETRY_JITTER` | `retry.jitter` (`1`/`0`/`true`/`false`) |
//! | `SDK_BREAKER_FAILURE_THRESHOLD` | `circuit_breaker.failure_threshold` |
//! | `SDK_BREAKER_RECOVERY_TIMEOUT_MS` | `circuit_breaker.recovery_timeout` |
//! | `SDK_BREAKER_SUCCESS_THRESHOLD` | `circuit_breaker.success_threshold` |
//! | `SDK_RPS` / `SDK_RPM` | `rate_limit.rate` (per second / per minute) |
//! | `SDK_RATE_BURST` | `rate_limit.capacity` |
//! | `SDK_CACHE_TTL_SECS` | `cache.default_ttl` |
//! | `SDK_CACHE_MAX_SIZE` | `cache.max_size` |
//!
//! Unparsable values are ignored and the existing setting is kept.

use crate::cache::CacheConfig;
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
use crate::signing::SignatureAlgorithm;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Serde adapter storing a [`Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub algorithm: SignatureAlgorithm,
    /// Custom headers with this prefix are covered by the signature.
    pub signed_header_prefix: Option<String>,
    #[serde(rename = "max_age_ms", with = "duration_ms")]
    pub max_age: Duration,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: SignatureAlgorithm::default(),
            signed_header_prefix: None,
            max_age: Duration::from_secs(300),
        }
    }
}

/// Every component section is optional; an absent section leaves that guard off.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub rate_limit: Option<RateLimiterConfig>,
    pub cache: Option<CacheConfig>,
    pub signing: Option<SigningConfig>,
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn env_bool(name: &str) -> Option<bool> {
    match std::env::var(name).ok()?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ResilienceConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let cfg = Self::default().with_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `SDK_*` environment overrides on top of this config.
    ///
    /// Breaker, rate limit and cache sections are created when any of their
    /// variables is set.
    pub fn with_env_overrides(mut self) -> Self {
        let retry = &mut self.retry;
        if let Some(v) = env_parse::<u32>("SDK_RETRY_MAX_ATTEMPTS") {
            retry.max_attempts = v;
        }
        if let Some(v) = env_parse::<u64>("SDK_RETRY_BASE_DELAY_MS") {
            retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("SDK_RETRY_MAX_DELAY_MS") {
            retry.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_bool("SDK_RETRY_JITTER") {
            retry.jitter = v;
        }

        let threshold = env_parse::<u32>("SDK_BREAKER_FAILURE_THRESHOLD");
        let recovery = env_parse::<u64>("SDK_BREAKER_RECOVERY_TIMEOUT_MS");
        let successes = env_parse::<u32>("SDK_BREAKER_SUCCESS_THRESHOLD");
        if threshold.is_some() || recovery.is_some() || successes.is_some() {
            let breaker = self.circuit_breaker.get_or_insert_with(CircuitBreakerConfig::default);
            if let Some(v) = threshold {
                breaker.failure_threshold = v;
            }
            if let Some(v) = recovery {
                breaker.recovery_timeout = Duration::from_millis(v);
            }
            if let Some(v) = successes {
                breaker.success_threshold = v;
            }
        }

        let rate = env_parse::<f64>("SDK_RPS")
            .or_else(|| env_parse::<f64>("SDK_RPM").map(|rpm| rpm / 60.0));
        let burst = env_parse::<f64>("SDK_RATE_BURST");
        if let Some(rate) = rate {
            let limit = self
                .rate_limit
                .get_or_insert_with(|| RateLimiterConfig::from_rps(rate).unwrap_or_default());
            limit.rate = rate;
        }
        if let (Some(burst), Some(limit)) = (burst, self.rate_limit.as_mut()) {
            limit.capacity = burst;
        }

        let ttl = env_parse::<u64>("SDK_CACHE_TTL_SECS");
        let max_size = env_parse::<usize>("SDK_CACHE_MAX_SIZE");
        if ttl.is_some() || max_size.is_some() {
            let cache = self.cache.get_or_insert_with(CacheConfig::default);
            if let Some(v) = ttl {
                cache.default_ttl = Duration::from_secs(v);
            }
            if let Some(v) = max_size {
                cache.max_size = v;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        if let Some(b) = &self.circuit_breaker {
            b.validate()?;
        }
        if let Some(r) = &self.rate_limit {
            r.validate()?;
        }
        if let Some(c) = &self.cache {
            c.validate()?;
        }
        Ok(())
    }
}
