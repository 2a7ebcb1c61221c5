//! Retry loop with exponential backoff, jitter and optional circuit breaker admission.

use crate::error::{Classify, FailureKind, OperationError, TransportKind};
use crate::resilience::circuit_breaker::{CallPermit, CircuitBreaker};
use crate::{Error, ErrorContext, Result};
use rand::Rng;
use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Granularity of the cancellation check while a blocking retry sleeps.
const BLOCKING_CANCEL_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "crate::config::duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "crate::config::duration_ms")]
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Scale each delay by a uniform factor in `[0.5, 1.0]`.
    pub jitter: bool,
    pub retryable_status_codes: HashSet<u16>,
    pub retryable_transport: HashSet<TransportKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            retryable_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
            retryable_transport: [TransportKind::Connect, TransportKind::Timeout]
                .into_iter()
                .collect(),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = base;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn with_retryable_transport(
        mut self,
        kinds: impl IntoIterator<Item = TransportKind>,
    ) -> Self {
        self.retryable_transport = kinds.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, msg: &str| {
            Err(Error::configuration_with_context(
                msg,
                ErrorContext::new()
                    .with_field_path(format!("retry.{}", field))
                    .with_source("retry_config"),
            ))
        };
        if self.max_attempts == 0 {
            return invalid("max_attempts", "max_attempts must be at least 1");
        }
        if self.base_delay.is_zero() {
            return invalid("base_delay_ms", "base_delay must be positive");
        }
        if self.max_delay < self.base_delay {
            return invalid("max_delay_ms", "max_delay must not be below base_delay");
        }
        if !self.exponential_base.is_finite() || self.exponential_base <= 1.0 {
            return invalid("exponential_base", "exponential_base must be greater than 1");
        }
        Ok(())
    }
}

/// Outcome of [`RetryHandler`] when the call did not succeed.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The terminal failure of the wrapped operation, unchanged.
    #[error("{0}")]
    Operation(E),

    #[error("circuit breaker open")]
    CircuitOpen { retry_in: Option<Duration> },

    #[error("operation cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    pub fn into_operation(self) -> Option<E> {
        match self {
            RetryError::Operation(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RetryError::CircuitOpen { .. })
    }
}

impl From<RetryError<OperationError>> for Error {
    fn from(err: RetryError<OperationError>) -> Self {
        match err {
            RetryError::Operation(e) => Error::Operation(e),
            RetryError::CircuitOpen { retry_in } => Error::CircuitOpen { retry_in },
            RetryError::Cancelled => Error::Cancelled,
        }
    }
}

/// Runs an operation up to `max_attempts` times.
///
/// Each attempt asks the breaker (if any) for admission, and every failure is
/// reported to it whether or not it is retryable. Only the last failure reaches
/// the caller.
#[derive(Clone)]
pub struct RetryHandler {
    config: RetryConfig,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            breaker: None,
        })
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn is_retryable<E: Classify>(&self, err: &E) -> bool {
        match err.failure_kind() {
            FailureKind::Http { status } => self.config.retryable_status_codes.contains(&status),
            FailureKind::Transport(kind) => self.config.retryable_transport.contains(&kind),
            FailureKind::Other => false,
        }
    }

    /// Backoff before attempt `attempt + 1`, without jitter.
    ///
    /// `attempt` is 1-based: the delay after the first failure is `base_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let cfg = &self.config;
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = cfg.exponential_base.powi(exponent);
        let secs = cfg.base_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= cfg.max_delay.as_secs_f64() {
            cfg.max_delay
        } else {
            cfg.base_delay.mul_f64(factor)
        }
    }

    /// Backoff actually slept after attempt `attempt`, jitter applied.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.config.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }

    /// Ask the breaker for admission. The permit must live until the attempt
    /// settles so a cancelled attempt hands its trial slot back.
    fn admit<E>(&self) -> std::result::Result<Option<CallPermit<'_>>, RetryError<E>> {
        match &self.breaker {
            Some(b) => match b.acquire() {
                Some(permit) => Ok(Some(permit)),
                None => Err(RetryError::CircuitOpen {
                    retry_in: b.retry_in(),
                }),
            },
            None => Ok(None),
        }
    }

    fn on_success(&self, permit: Option<CallPermit<'_>>) {
        if let Some(permit) = permit {
            permit.record_success();
        }
    }

    /// Record a failure and decide whether to retry; `Some(delay)` means retry.
    fn on_failure<E: Classify + Display>(
        &self,
        err: &E,
        attempt: u32,
        permit: Option<CallPermit<'_>>,
    ) -> Option<Duration> {
        if let Some(permit) = permit {
            permit.record_failure();
        }
        let retryable = self.is_retryable(err);
        if !retryable || attempt >= self.config.max_attempts {
            debug!(
                attempt,
                retryable,
                error = %err,
                "operation failed, not retrying"
            );
            return None;
        }
        let delay = self.backoff(attempt);
        warn!(
            attempt,
            max_attempts = self.config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retryable failure, backing off"
        );
        Some(delay)
    }

    /// Run `op` with retries.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> std::result::Result<T, RetryError<E>>
    where
        E: Classify + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.execute_with_cancel(op, &CancellationToken::new()).await
    }

    /// Run `op` with retries, giving up as soon as `cancel` fires.
    ///
    /// The token is checked before every attempt and raced against each backoff
    /// sleep. An attempt already in flight is allowed to finish. Dropping the
    /// returned future mid-attempt releases any half-open trial slot it held.
    pub async fn execute_with_cancel<T, E, F, Fut>(
        &self,
        mut op: F,
        cancel: &CancellationToken,
    ) -> std::result::Result<T, RetryError<E>>
    where
        E: Classify + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut attempt: u32 = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            let permit = self.admit()?;

            match op().await {
                Ok(value) => {
                    self.on_success(permit);
                    return Ok(value);
                }
                Err(err) => {
                    let Some(delay) = self.on_failure(&err, attempt, permit) else {
                        return Err(RetryError::Operation(err));
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
            attempt += 1;
        }
    }

    /// Blocking counterpart of [`execute`](Self::execute); sleeps the calling thread.
    pub fn execute_blocking<T, E, F>(&self, op: F) -> std::result::Result<T, RetryError<E>>
    where
        E: Classify + Display,
        F: FnMut() -> std::result::Result<T, E>,
    {
        self.execute_blocking_with_cancel(op, &CancellationToken::new())
    }

    pub fn execute_blocking_with_cancel<T, E, F>(
        &self,
        mut op: F,
        cancel: &CancellationToken,
    ) -> std::result::Result<T, RetryError<E>>
    where
        E: Classify + Display,
        F: FnMut() -> std::result::Result<T, E>,
    {
        let mut attempt: u32 = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            let permit = self.admit()?;

            match op() {
                Ok(value) => {
                    self.on_success(permit);
                    return Ok(value);
                }
                Err(err) => {
                    let Some(delay) = self.on_failure(&err, attempt, permit) else {
                        return Err(RetryError::Operation(err));
                    };
                    if !sleep_unless_cancelled(delay, cancel) {
                        return Err(RetryError::Cancelled);
                    }
                }
            }
            attempt += 1;
        }
    }
}

/// Sleep for `delay` in short slices; returns `false` if cancelled first.
fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(BLOCKING_CANCEL_POLL));
    }
}
