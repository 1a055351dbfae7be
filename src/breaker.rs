//! Per-provider circuit breaker.
//!
//! Each provider owns one breaker, a small state machine protecting the
//! system from hammering a backend that keeps failing:
//!
//! - `Closed` (initial): calls pass through. Consecutive failures are
//!   counted; reaching the threshold trips the breaker to `Open`.
//! - `Open`: calls are rejected immediately with `ProviderUnavailable`,
//!   with no network attempt. After the cooldown elapses the next
//!   caller is let through as a probe (`HalfOpen`).
//! - `HalfOpen`: exactly one probe is in flight; every other caller is
//!   rejected until it resolves. A successful probe closes the breaker
//!   and resets its counters; a failed probe re-opens it and doubles
//!   the cooldown, up to a cap.
//!
//! All transitions and the single-probe gate are serialized behind one
//! mutex; no lock is held across an await point.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::providers::{Error, ErrorKind};

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);
const DEFAULT_MAX_COOLDOWN: Duration = Duration::from_secs(300);

/// Tunable numbers governing one breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip `Closed` to `Open`.
    pub failure_threshold: u32,
    /// Time spent `Open` before a probe is admitted.
    pub cooldown: Duration,
    /// Ceiling for the doubling cooldown after failed probes.
    pub max_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            max_cooldown: DEFAULT_MAX_COOLDOWN,
        }
    }
}

/// The observable state of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// How an admitted call should report back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// A normal pass-through call in `Closed`.
    Normal,
    /// The single recovery probe admitted from `HalfOpen`.
    Probe,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    config: BreakerConfig,
    name: String,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub(crate) fn new(name: &str, config: BreakerConfig) -> CircuitBreaker {
        let cooldown = config.cooldown;

        CircuitBreaker {
            config,
            name: name.to_string(),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                cooldown,
                probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Ask the breaker whether a call may proceed.
    ///
    /// Rejections carry `ProviderUnavailable` with the retry flag off,
    /// so no retry layer re-attempts through a tripped breaker.
    pub(crate) fn try_acquire(&self) -> Result<Admission, Error> {
        let mut inner = self.lock();

        match inner.state {
            BreakerState::Closed => Ok(Admission::Normal),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);

                if elapsed < inner.cooldown {
                    return Err(rejection());
                }

                debug!(breaker = %self.name, "cooldown elapsed, admitting probe");
                inner.state = BreakerState::HalfOpen;
                inner.probe_in_flight = true;

                Ok(Admission::Probe)
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(rejection());
                }

                inner.probe_in_flight = true;

                Ok(Admission::Probe)
            }
        }
    }

    /// Report a successful call.
    pub(crate) fn on_success(&self, admission: Admission) {
        let mut inner = self.lock();

        match admission {
            Admission::Probe => {
                debug!(breaker = %self.name, "probe succeeded, closing");
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.cooldown = self.config.cooldown;
                inner.probe_in_flight = false;
            }
            Admission::Normal => {
                inner.consecutive_failures = 0;
            }
        }
    }

    /// Report a failed call.
    pub(crate) fn on_failure(&self, admission: Admission) {
        let mut inner = self.lock();

        match admission {
            Admission::Probe => {
                let cooldown = (inner.cooldown * 2).min(self.config.max_cooldown);

                warn!(
                    breaker = %self.name,
                    cooldown_secs = cooldown.as_secs(),
                    "probe failed, re-opening"
                );
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.cooldown = cooldown;
                inner.probe_in_flight = false;
            }
            Admission::Normal => {
                inner.consecutive_failures += 1;

                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "failure threshold reached, opening"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }

    /// The current state, with the `Open` → `HalfOpen` cooldown edge
    /// applied lazily so callers observing the breaker see the same
    /// answer `try_acquire` would act on.
    pub(crate) fn state(&self) -> BreakerState {
        let inner = self.lock();

        if inner.state == BreakerState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| at.elapsed())
                .unwrap_or(Duration::ZERO);

            if elapsed >= inner.cooldown {
                return BreakerState::HalfOpen;
            }
        }

        inner.state
    }
}

fn rejection() -> Error {
    Error::from_kind(ErrorKind::ProviderUnavailable).with_retryable(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", BreakerConfig::default())
    }

    fn fail_times(cb: &CircuitBreaker, count: u32) {
        for _ in 0..count {
            let admission = cb.try_acquire().expect("closed breaker admits calls");
            cb.on_failure(admission);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_failures_open_the_breaker() {
        let cb = breaker();

        fail_times(&cb, 4);
        assert_eq!(cb.state(), BreakerState::Closed);

        fail_times(&cb, 1);
        assert_eq!(cb.state(), BreakerState::Open);

        let err = cb.try_acquire().expect_err("open breaker rejects");
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
        assert!(!err.retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_count() {
        let cb = breaker();

        fail_times(&cb, 4);

        let admission = cb.try_acquire().expect("still closed");
        cb.on_success(admission);

        fail_times(&cb, 4);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_admits_exactly_one_probe() {
        let cb = breaker();

        fail_times(&cb, 5);
        advance(Duration::from_secs(31)).await;

        let probe = cb.try_acquire().expect("one probe is admitted");
        assert_eq!(probe, Admission::Probe);

        // A concurrent caller in the same window is rejected.
        let err = cb.try_acquire().expect_err("second caller rejected");
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);

        cb.on_success(probe);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_doubles_the_cooldown() {
        let cb = breaker();

        fail_times(&cb, 5);
        advance(Duration::from_secs(31)).await;

        let probe = cb.try_acquire().expect("probe admitted");
        cb.on_failure(probe);
        assert_eq!(cb.state(), BreakerState::Open);

        // The original cooldown no longer suffices.
        advance(Duration::from_secs(31)).await;
        cb.try_acquire().expect_err("cooldown doubled to 60s");

        advance(Duration::from_secs(30)).await;
        let probe = cb.try_acquire().expect("probe after doubled cooldown");
        cb.on_success(probe);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_doubling_is_capped() {
        let cb = CircuitBreaker::new(
            "capped",
            BreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_secs(30),
                max_cooldown: Duration::from_secs(60),
            },
        );

        fail_times(&cb, 1);

        // Fail enough probes that uncapped doubling would exceed the cap.
        for _ in 0..4 {
            advance(Duration::from_secs(61)).await;
            let probe = cb.try_acquire().expect("probe admitted");
            cb.on_failure(probe);
        }

        advance(Duration::from_secs(61)).await;
        assert!(cb.try_acquire().is_ok(), "cooldown stays at the cap");
    }
}
