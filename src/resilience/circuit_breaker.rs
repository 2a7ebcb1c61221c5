use crate::{Error, ErrorContext, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Admission state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub failure_count: u32,
    pub success_count: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures (net of healing successes) that trip a closed breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before allowing a trial.
    #[serde(rename = "recovery_timeout_ms", with = "crate::config::duration_ms")]
    pub recovery_timeout: Duration,
    /// Consecutive trial successes needed to close again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set how long the breaker stays open before a trial call
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Set the number of half-open successes required to close
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::configuration_with_context(
                "failure_threshold must be at least 1",
                ErrorContext::new()
                    .with_field_path("circuit_breaker.failure_threshold")
                    .with_source("circuit_breaker"),
            ));
        }
        if self.success_threshold == 0 {
            return Err(Error::configuration_with_context(
                "success_threshold must be at least 1",
                ErrorContext::new()
                    .with_field_path("circuit_breaker.success_threshold")
                    .with_source("circuit_breaker"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    /// Trial calls admitted in half-open that have not reported back yet.
    trials_in_flight: u32,
    /// Bumped whenever the set of outstanding trials is discarded, so permits
    /// from an earlier round cannot release or count against the current one.
    trial_epoch: u64,
    last_trial: Option<Instant>,
}

/// How a call got past the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Pass,
    Trial(u64),
}

/// Admission handed out by [`CircuitBreaker::acquire`].
///
/// Report the outcome with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). A permit dropped without a report,
/// for example because its future was cancelled, gives its half-open trial slot
/// back instead of holding it forever.
#[must_use = "dropping a permit without recording an outcome abandons the call"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this call is a half-open trial.
    pub fn is_trial(&self) -> bool {
        matches!(self.admission, Admission::Trial(_))
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.settle(self.admission, true);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.admission, false);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Admission::Trial(epoch) = self.admission {
            self.breaker.release_trial(epoch);
        }
    }
}

impl std::fmt::Debug for CallPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPermit")
            .field("admission", &self.admission)
            .field("settled", &self.settled)
            .finish()
    }
}

/// Three-state circuit breaker protecting one logical call path.
///
/// - **Closed**: calls pass; failures accumulate, successes heal one failure each.
/// - **Open**: calls are rejected until `recovery_timeout` has passed since the
///   last failure; the first call after that moves to half-open.
/// - **Half-open**: at most `success_threshold` trial calls are admitted at once;
///   `success_threshold` successes close the breaker, any failure reopens it.
///   Trials that never report back stop blocking admission once
///   `recovery_timeout` has passed since the latest one was admitted.
///
/// All transitions happen under a single mutex, so concurrent callers never see a
/// torn state.
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                trials_in_flight: 0,
                trial_epoch: 0,
                last_trial: None,
            }),
        })
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Every critical section leaves the state consistent, so a panic elsewhere
        // cannot leave it half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admission decision for the next call.
    ///
    /// Moves an open breaker to half-open once the recovery timeout has elapsed.
    /// A `true` answer obliges the caller to report through
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure); prefer [`acquire`](Self::acquire)
    /// when the call can be cancelled.
    pub fn can_execute(&self) -> bool {
        self.admission().is_some()
    }

    /// Admit the next call and return a permit that reports its outcome.
    pub fn acquire(&self) -> Option<CallPermit<'_>> {
        self.admission().map(|admission| CallPermit {
            breaker: self,
            admission,
            settled: false,
        })
    }

    fn admission(&self) -> Option<Admission> {
        let mut st = self.lock();
        let now = Instant::now();
        match st.state {
            CircuitState::Closed => Some(Admission::Pass),
            CircuitState::Open => {
                let elapsed = st
                    .last_failure
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or(Duration::MAX);
                if elapsed < self.cfg.recovery_timeout {
                    return None;
                }
                info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "circuit breaker half-open, admitting trial call"
                );
                st.state = CircuitState::HalfOpen;
                st.success_count = 0;
                st.trial_epoch = st.trial_epoch.wrapping_add(1);
                st.trials_in_flight = 1;
                st.last_trial = Some(now);
                Some(Admission::Trial(st.trial_epoch))
            }
            CircuitState::HalfOpen => {
                if st.trials_in_flight >= self.cfg.success_threshold {
                    let stale = st
                        .last_trial
                        .map_or(true, |t| now.saturating_duration_since(t) >= self.cfg.recovery_timeout);
                    if !stale {
                        return None;
                    }
                    warn!(
                        abandoned = st.trials_in_flight,
                        "half-open trial calls never reported back, admitting new trials"
                    );
                    st.trial_epoch = st.trial_epoch.wrapping_add(1);
                    st.trials_in_flight = 0;
                }
                st.trials_in_flight += 1;
                st.last_trial = Some(now);
                Some(Admission::Trial(st.trial_epoch))
            }
        }
    }

    /// Like [`can_execute`](Self::can_execute) but reports rejection as an error.
    pub fn allow(&self) -> Result<()> {
        if self.can_execute() {
            Ok(())
        } else {
            Err(Error::CircuitOpen {
                retry_in: self.retry_in(),
            })
        }
    }

    pub fn record_success(&self) {
        let mut st = self.lock();
        self.on_success(&mut st, true);
    }

    pub fn record_failure(&self) {
        let mut st = self.lock();
        self.on_failure(&mut st);
    }

    fn settle(&self, admission: Admission, success: bool) {
        let mut st = self.lock();
        if success {
            // Only a trial of the current round counts toward closing.
            let current = admission == Admission::Trial(st.trial_epoch);
            self.on_success(&mut st, current);
        } else {
            self.on_failure(&mut st);
        }
    }

    fn release_trial(&self, epoch: u64) {
        let mut st = self.lock();
        if st.state == CircuitState::HalfOpen && st.trial_epoch == epoch {
            st.trials_in_flight = st.trials_in_flight.saturating_sub(1);
            debug!(
                trials_in_flight = st.trials_in_flight,
                "trial call abandoned, slot released"
            );
        }
    }

    fn on_success(&self, st: &mut State, counts_as_trial: bool) {
        match st.state {
            CircuitState::Closed => {
                st.failure_count = st.failure_count.saturating_sub(1);
            }
            CircuitState::HalfOpen if counts_as_trial => {
                st.trials_in_flight = st.trials_in_flight.saturating_sub(1);
                st.success_count = st.success_count.saturating_add(1);
                if st.success_count >= self.cfg.success_threshold {
                    info!("circuit breaker closed after successful trial calls");
                    st.state = CircuitState::Closed;
                    st.failure_count = 0;
                    st.success_count = 0;
                    st.trials_in_flight = 0;
                    st.last_trial = None;
                }
            }
            // A call admitted before the current round finished late.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, st: &mut State) {
        let now = Instant::now();
        match st.state {
            CircuitState::Closed => {
                st.failure_count = st.failure_count.saturating_add(1);
                if st.failure_count >= self.cfg.failure_threshold {
                    warn!(
                        failure_count = st.failure_count,
                        recovery_timeout_ms = self.cfg.recovery_timeout.as_millis() as u64,
                        "circuit breaker opened"
                    );
                    st.state = CircuitState::Open;
                    st.last_failure = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                warn!("trial call failed, circuit breaker reopened");
                st.state = CircuitState::Open;
                st.success_count = 0;
                st.trials_in_flight = 0;
                st.last_trial = None;
                st.last_failure = Some(now);
            }
            CircuitState::Open => {
                st.last_failure = Some(now);
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Remaining time before an open breaker admits a trial call.
    pub fn retry_in(&self) -> Option<Duration> {
        let st = self.lock();
        self.open_remaining(&st)
    }

    fn open_remaining(&self, st: &State) -> Option<Duration> {
        if st.state != CircuitState::Open {
            return None;
        }
        let elapsed = st
            .last_failure
            .map(|t| Instant::now().saturating_duration_since(t))
            .unwrap_or(Duration::MAX);
        self.cfg.recovery_timeout.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// Force the breaker back to closed with cleared counters.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.state = CircuitState::Closed;
        st.failure_count = 0;
        st.success_count = 0;
        st.last_failure = None;
        st.trials_in_flight = 0;
        st.trial_epoch = st.trial_epoch.wrapping_add(1);
        st.last_trial = None;
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let st = self.lock();
        CircuitBreakerSnapshot {
            state: st.state,
            failure_threshold: self.cfg.failure_threshold,
            success_threshold: self.cfg.success_threshold,
            recovery_timeout_ms: self.cfg.recovery_timeout.as_millis() as u64,
            failure_count: st.failure_count,
            success_count: st.success_count,
            open_remaining_ms: self.open_remaining(&st).map(|d| d.as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn breaker(failures: u32, recovery_ms: u64, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(failures)
                .with_recovery_timeout(Duration::from_millis(recovery_ms))
                .with_success_threshold(successes),
        )
        .unwrap()
    }

    #[test]
    fn test_circuit_breaker_config_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.success_threshold, 3);
    }

    #[test]
    fn test_circuit_breaker_rejects_zero_thresholds() {
        assert!(CircuitBreaker::new(CircuitBreakerConfig::new().with_failure_threshold(0)).is_err());
        assert!(CircuitBreaker::new(CircuitBreakerConfig::new().with_success_threshold(0)).is_err());
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = breaker(3, 1000, 1);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.failure_count, 0);
        assert!(snapshot.open_remaining_ms.is_none());
    }

    #[test]
    fn test_circuit_breaker_opens_at_threshold() {
        let cb = breaker(3, 10_000, 1);
        cb.record_failure();
        cb.record_failure();
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
        assert!(cb.allow().is_err());
        assert!(cb.snapshot().open_remaining_ms.is_some());
    }

    #[test]
    fn test_success_heals_one_failure_in_closed() {
        let cb = breaker(3, 10_000, 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.snapshot().failure_count, 1);
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.snapshot().failure_count, 0);

        // Interleaved failures and successes never trip the breaker.
        for _ in 0..10 {
            cb.record_failure();
            cb.record_success();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_recovers_through_half_open() {
        let cb = breaker(2, 30, 2);
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.can_execute());

        thread::sleep(Duration::from_millis(40));

        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.can_execute());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
        assert_eq!(cb.snapshot().success_count, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(1, 20, 3);
        cb.record_failure();
        thread::sleep(Duration::from_millis(30));
        assert!(cb.can_execute());
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().success_count, 0);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_half_open_limits_concurrent_trials() {
        let cb = breaker(1, 50, 2);
        cb.record_failure();
        thread::sleep(Duration::from_millis(60));
        assert!(cb.can_execute());
        assert!(cb.can_execute());
        assert!(!cb.can_execute());
        cb.record_success();
        assert!(cb.can_execute());
    }

    #[test]
    fn test_reset_closes() {
        let cb = breaker(1, 60_000, 1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_concurrent_recovery_transitions_once() {
        use std::sync::Arc;

        let cb = Arc::new(breaker(1, 100, 1));
        cb.record_failure();
        thread::sleep(Duration::from_millis(120));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                thread::spawn(move || cb.can_execute())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 1);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_circuit_breaker_thread_safe() {
        use std::sync::Arc;

        let cb = Arc::new(breaker(100, 1000, 1));
        let mut handles = vec![];
        for _ in 0..10 {
            let cb_clone = Arc::clone(&cb);
            handles.push(thread::spawn(move || {
                for _ in 0..5 {
                    cb_clone.record_failure();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cb.snapshot().failure_count, 50);
    }

    #[test]
    fn test_dropped_trial_permit_releases_slot() {
        let cb = breaker(1, 50, 1);
        cb.record_failure();
        thread::sleep(Duration::from_millis(60));

        let trial = cb.acquire().expect("trial admitted");
        assert!(trial.is_trial());
        assert!(cb.acquire().is_none());

        // Abandoned mid-flight, e.g. its future was cancelled by a timeout.
        drop(trial);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let retry = cb.acquire().expect("slot released");
        retry.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_recorded_permit_does_not_release_twice() {
        let cb = breaker(1, 50, 2);
        cb.record_failure();
        thread::sleep(Duration::from_millis(60));

        let first = cb.acquire().unwrap();
        let second = cb.acquire().unwrap();
        first.record_success();
        assert_eq!(cb.snapshot().success_count, 1);
        // One slot freed by the report; the other still held by `second`.
        let third = cb.acquire().unwrap();
        assert!(cb.acquire().is_none());
        drop(second);
        third.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_closed_permit_heals_failures() {
        let cb = breaker(3, 1000, 1);
        cb.record_failure();
        let permit = cb.acquire().unwrap();
        assert!(!permit.is_trial());
        permit.record_success();
        assert_eq!(cb.snapshot().failure_count, 0);

        cb.acquire().unwrap().record_failure();
        assert_eq!(cb.snapshot().failure_count, 1);
        // Dropping a closed-state permit records nothing.
        drop(cb.acquire().unwrap());
        assert_eq!(cb.snapshot().failure_count, 1);
    }

    #[test]
    fn test_unreported_trials_expire_after_recovery_timeout() {
        let cb = breaker(1, 20, 1);
        cb.record_failure();
        thread::sleep(Duration::from_millis(30));

        // Admitted through the bool API and never reported.
        assert!(cb.can_execute());
        assert!(!cb.can_execute());

        thread::sleep(Duration::from_millis(30));
        let permit = cb.acquire().expect("stale trial no longer blocks");
        permit.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_late_report_from_expired_trial_is_ignored() {
        let cb = breaker(1, 20, 2);
        cb.record_failure();
        thread::sleep(Duration::from_millis(30));

        let old_a = cb.acquire().unwrap();
        let old_b = cb.acquire().unwrap();
        thread::sleep(Duration::from_millis(30));
        let fresh = cb.acquire().unwrap();

        old_a.record_success();
        assert_eq!(cb.snapshot().success_count, 0);
        drop(old_b);
        fresh.record_success();
        assert_eq!(cb.snapshot().success_count, 1);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_follows_tokio_clock() {
        let cb = breaker(1, 30_000, 1);
        cb.record_failure();
        assert!(cb.acquire().is_none());
        assert_eq!(cb.snapshot().open_remaining_ms, Some(30_000));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cb.acquire().is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        cb.acquire().expect("trial after recovery").record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
