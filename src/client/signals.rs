use crate::cache::CacheStats;
use crate::resilience::{CircuitBreakerSnapshot, RateLimiterSnapshot};

/// Point-in-time view of the guards around a client, for dashboards and routing.
///
/// Facts only; callers decide what to do with them.
#[derive(Debug, Clone, Default)]
pub struct SignalsSnapshot {
    pub rate_limiter: Option<RateLimiterSnapshot>,
    pub circuit_breaker: Option<CircuitBreakerSnapshot>,
    pub cache: Option<CacheStats>,
}
