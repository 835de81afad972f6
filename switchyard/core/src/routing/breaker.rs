//! Circuit Breaker
//!
//! Per-dependency failure state machine. One breaker guards one provider
//! (or one hybrid route) and is shared by every in-flight request.
//!
//! ```text
//! +--------+  failure_threshold  +------+      cooldown      +-----------+
//! | Closed | ------------------> | Open | -----------------> | Half-Open |
//! +--------+     failures        +------+                    +-----------+
//!     ^                              ^       trial fails           |
//!     |                              +-----------------------------+
//!     |                     trial succeeds                         |
//!     +------------------------------------------------------------+
//! ```
//!
//! Half-open permits exactly one trial invocation. Callers check
//! [`CircuitBreaker::can_execute`] when building a candidate list and claim
//! a [`BreakerPermit`] with [`CircuitBreaker::try_begin`] right before
//! invoking. The permit reports the outcome; a permit dropped without one
//! (cancelled caller, outer timeout) counts as a failure.
//!
//! Every opening starts a new trial generation. A half-open permit carries
//! the generation it claimed, and only that permit can settle the trial:
//! results from invocations that began while the circuit was still closed
//! update the failure count but never move a half-open circuit.
//!
//! All state is held in atomics; transitions use compare-and-swap so that
//! concurrent recorders never lose an update or log a transition twice.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

const TRIAL_CLAIMED: u64 = 1;

/// Circuit breaker state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    #[default]
    Closed,

    /// Rejecting requests until the cooldown elapses
    Open,

    /// One trial request allowed
    HalfOpen,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            OPEN => Self::Open,
            HALF_OPEN => Self::HalfOpen,
            _ => Self::Closed,
        }
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker thresholds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// How long the circuit stays open before allowing a trial
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Failure state machine for one dependency
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,

    /// 0 = Closed, 1 = Open, 2 = `HalfOpen`
    state: AtomicU8,

    consecutive_failures: AtomicU32,

    /// Trial generation in the high bits, claimed flag in bit 0
    trial: AtomicU64,

    /// When the circuit last opened (millis since startup)
    opened_at: AtomicU64,

    /// Last success (millis since startup, 0 = never)
    last_success_ts: AtomicU64,

    /// Last failure (millis since startup, 0 = never)
    last_failure_ts: AtomicU64,

    startup_time: Instant,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: AtomicU8::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            trial: AtomicU64::new(0),
            opened_at: AtomicU64::new(0),
            last_success_ts: AtomicU64::new(0),
            last_failure_ts: AtomicU64::new(0),
            startup_time: Instant::now(),
        }
    }

    /// Name of the guarded dependency
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Thresholds in use
    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, moving open to half-open once the cooldown has elapsed
    pub fn state(&self) -> CircuitState {
        let state = CircuitState::from_u8(self.state.load(Ordering::Acquire));
        if state == CircuitState::Open && self.cooldown_elapsed() {
            self.transition_to_half_open();
            return CircuitState::from_u8(self.state.load(Ordering::Acquire));
        }
        state
    }

    /// Whether the dependency may be considered for a request
    ///
    /// False only while open with the cooldown unexpired. A half-open breaker
    /// reports true even when its trial is taken; [`Self::try_begin`] decides.
    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Claim permission for one invocation
    ///
    /// Always granted while closed. While half-open only the first caller
    /// gets the trial until its permit settles.
    pub fn try_begin(&self) -> Option<BreakerPermit<'_>> {
        match self.state() {
            CircuitState::Closed => Some(BreakerPermit::new(self, None)),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                let current = self.trial.load(Ordering::Acquire);
                if current & TRIAL_CLAIMED != 0 {
                    return None;
                }
                self.trial
                    .compare_exchange(
                        current,
                        current | TRIAL_CLAIMED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .ok()
                    .map(|_| BreakerPermit::new(self, Some(current >> 1)))
            }
        }
    }

    /// Record a successful invocation made without a permit
    ///
    /// Closes a half-open circuit whoever holds the trial.
    pub fn record_success(&self) {
        self.last_success_ts.store(self.now_millis(), Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);

        if self
            .state
            .compare_exchange(HALF_OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!(provider = %self.name, "Circuit breaker closed, provider recovered");
        }
    }

    /// Record a failed invocation made without a permit
    ///
    /// Reopens a half-open circuit whoever holds the trial.
    pub fn record_failure(&self) {
        self.last_failure_ts.store(self.now_millis(), Ordering::Release);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        match CircuitState::from_u8(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed if failures >= self.config.failure_threshold => {
                self.transition_to_open(CLOSED, failures);
            }
            CircuitState::HalfOpen => {
                self.transition_to_open(HALF_OPEN, failures);
            }
            _ => {}
        }
    }

    /// Return to closed with counters cleared
    ///
    /// Outstanding trial permits become stale and settle nothing.
    pub fn reset(&self) {
        self.next_trial_generation();
        self.state.store(CLOSED, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at.store(0, Ordering::Release);
        tracing::info!(provider = %self.name, "Circuit breaker reset");
    }

    /// Consecutive failures since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Time since the last recorded success
    pub fn time_since_last_success(&self) -> Option<Duration> {
        self.elapsed_since(self.last_success_ts.load(Ordering::Acquire))
    }

    /// Time since the last recorded failure
    pub fn time_since_last_failure(&self) -> Option<Duration> {
        self.elapsed_since(self.last_failure_ts.load(Ordering::Acquire))
    }

    /// Settle an invocation claimed through a permit
    fn settle(&self, trial: Option<u64>, success: bool) {
        let now = self.now_millis();
        let failures = if success {
            self.last_success_ts.store(now, Ordering::Release);
            self.consecutive_failures.store(0, Ordering::Release);
            0
        } else {
            self.last_failure_ts.store(now, Ordering::Release);
            self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
        };

        match trial {
            Some(generation) => {
                let claimed = (generation << 1) | TRIAL_CLAIMED;
                if self.trial.load(Ordering::Acquire) != claimed {
                    tracing::debug!(provider = %self.name, "Stale trial result ignored");
                    return;
                }
                if success {
                    self.record_trial_success(claimed);
                } else {
                    self.transition_to_open(HALF_OPEN, failures);
                }
            }
            None => {
                let state = self.state.load(Ordering::Acquire);
                if !success && state == CLOSED && failures >= self.config.failure_threshold {
                    self.transition_to_open(CLOSED, failures);
                }
            }
        }
    }

    fn record_trial_success(&self, claimed: u64) {
        if self
            .state
            .compare_exchange(HALF_OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!(provider = %self.name, "Circuit breaker closed, provider recovered");
        }
        let _ = self.trial.compare_exchange(
            claimed,
            claimed & !TRIAL_CLAIMED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Start a new unclaimed trial generation
    fn next_trial_generation(&self) {
        let _ = self
            .trial
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(((v >> 1) + 1) << 1)
            });
    }

    fn transition_to_open(&self, from: u8, failures: u32) {
        // Visible before the state flips so the cooldown never reads a stale start
        self.opened_at.store(self.now_millis(), Ordering::Release);
        self.next_trial_generation();
        if self
            .state
            .compare_exchange(from, OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::warn!(
                provider = %self.name,
                consecutive_failures = failures,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Circuit breaker opened"
            );
        }
    }

    fn transition_to_half_open(&self) {
        if self
            .state
            .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!(provider = %self.name, "Circuit breaker half-open, allowing one trial");
        }
    }

    fn cooldown_elapsed(&self) -> bool {
        let opened_at = self.opened_at.load(Ordering::Acquire);
        let cooldown_ms = self.config.cooldown.as_millis() as u64;
        self.now_millis().saturating_sub(opened_at) >= cooldown_ms
    }

    fn elapsed_since(&self, ts: u64) -> Option<Duration> {
        if ts == 0 {
            return None;
        }
        Some(Duration::from_millis(self.now_millis().saturating_sub(ts)))
    }

    /// Millis since startup, at least 1 so that 0 means "never"
    fn now_millis(&self) -> u64 {
        self.startup_time.elapsed().as_millis() as u64 + 1
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures())
            .finish()
    }
}

// ============================================================================
// Permits
// ============================================================================

/// Claim on one invocation, returned by [`CircuitBreaker::try_begin`]
///
/// Report the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure). Dropping an unsettled permit records a failure.
#[must_use = "dropping a permit records a failure"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    /// Generation of the half-open trial this permit holds
    trial: Option<u64>,
    settled: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: Option<u64>) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this permit holds the half-open trial
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    /// The invocation succeeded
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.trial, true);
    }

    /// The invocation failed
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.trial, false);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(
                provider = %self.breaker.name,
                trial = self.trial.is_some(),
                "Invocation abandoned, counting as failure"
            );
            self.breaker.settle(self.trial, false);
        }
    }
}

impl fmt::Debug for BreakerPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerPermit")
            .field("breaker", &self.breaker.name)
            .field("trial", &self.trial)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "alpha",
            BreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_millis(cooldown_ms),
            },
        )
    }

    #[test]
    fn test_initial_state() {
        let cb = breaker(3, 60_000);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        assert!(cb.try_begin().is_some_and(|p| !p.is_trial()));
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(cb.time_since_last_success().is_none());
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(3, 60_000);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
        assert!(cb.try_begin().is_none());
        assert!(cb.time_since_last_failure().is_some());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, 60_000);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 2);
    }

    #[test]
    fn test_half_open_after_cooldown_then_close() {
        let cb = breaker(2, 10);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(25));

        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let permit = cb.try_begin().unwrap();
        assert!(permit.is_trial());
        permit.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(2, 10);

        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.try_begin().unwrap().failure();

        // Reopened with a fresh cooldown
        assert_eq!(
            CircuitState::from_u8(cb.state.load(Ordering::Acquire)),
            CircuitState::Open
        );
    }

    #[test]
    fn test_half_open_allows_single_trial() {
        let cb = breaker(1, 10);

        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));

        let permit = cb.try_begin().unwrap();
        assert!(cb.try_begin().is_none());
        assert!(cb.can_execute());
        drop(permit);
    }

    #[test]
    fn test_dropped_trial_permit_reopens() {
        let cb = breaker(1, 10);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));

        let permit = cb.try_begin().unwrap();
        drop(permit);
        assert_eq!(
            CircuitState::from_u8(cb.state.load(Ordering::Acquire)),
            CircuitState::Open
        );

        // The next cooldown offers a fresh trial
        std::thread::sleep(Duration::from_millis(25));
        cb.try_begin().unwrap().success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_dropped_closed_permit_counts_failure() {
        let cb = breaker(2, 60_000);
        drop(cb.try_begin().unwrap());
        assert_eq!(cb.consecutive_failures(), 1);
        drop(cb.try_begin().unwrap());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_late_closed_result_does_not_settle_trial() {
        let cb = breaker(1, 10);

        // Started while closed, finishes after the circuit went half-open
        let early = cb.try_begin().unwrap();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        let trial = cb.try_begin().unwrap();
        assert!(trial.is_trial());

        early.failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_reset_makes_trial_permit_stale() {
        let cb = breaker(1, 10);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        let trial = cb.try_begin().unwrap();

        cb.reset();
        trial.failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_concurrent_trial_claim() {
        let cb = Arc::new(breaker(1, 10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || {
                    // Keep the claim alive so no other thread can take it
                    cb.try_begin().map(std::mem::forget).is_some()
                })
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 1);
    }

    #[test]
    fn test_reset() {
        let cb = breaker(1, 60_000);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
        assert_eq!(
            serde_json::to_string(&CircuitState::Open).unwrap(),
            "\"open\""
        );
    }
}
