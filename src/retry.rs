//! Retry scheduling for a single provider call.
//!
//! The policy computes exponential backoff delays with uniform jitter
//! and decides, per classified failure, whether another attempt is
//! worthwhile. The backoff sleep is the only suspension point in the
//! retry path and always races the logical request's deadline: once the
//! deadline cannot accommodate the next delay, the call fails fast
//! instead of retrying.

use rand::Rng;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

use crate::providers::{Error, ErrorKind};

const DEFAULT_BASE: Duration = Duration::from_millis(250);
const DEFAULT_MAX: Duration = Duration::from_secs(30);
const DEFAULT_MAX_ATTEMPTS: u32 = 4;
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Fraction of the computed delay added as uniform jitter.
const JITTER_FRACTION: f64 = 0.3;

/// Delay and ceiling numbers governing retries of one provider call.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// First-attempt delay; doubles on each subsequent attempt.
    pub base: Duration,
    /// Cap applied to the exponential term before jitter.
    pub max: Duration,
    /// Total attempts permitted per logical call.
    pub max_attempts: u32,
    /// Delay used for a rate limit that did not suggest its own.
    pub default_retry_after: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> BackoffPolicy {
        BackoffPolicy {
            base: DEFAULT_BASE,
            max: DEFAULT_MAX,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            default_retry_after: DEFAULT_RETRY_AFTER,
        }
    }
}

/// Per-call ephemeral retry state. Created fresh for every logical
/// request and discarded on completion.
#[derive(Debug)]
pub(crate) struct RetryContext {
    pub attempt: u32,
    pub deadline: Instant,
    pub last_delay: Duration,
}

impl RetryContext {
    pub(crate) fn new(deadline: Instant) -> RetryContext {
        RetryContext {
            attempt: 0,
            deadline,
            last_delay: Duration::ZERO,
        }
    }
}

impl BackoffPolicy {
    /// The delay before the attempt following `attempt` (1-based):
    /// `base * 2^(attempt-1)` capped at `max`, plus uniform jitter in
    /// `[0, 0.3 * delay]`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let uncapped = self.base.saturating_mul(1_u32 << exponent);
        let capped = uncapped.min(self.max);

        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);

        capped + capped.mul_f64(jitter)
    }

    /// The delay to apply after `err`, honoring a server-suggested
    /// rate-limit delay over the exponential schedule.
    fn delay_for(&self, ctx: &RetryContext, err: &Error) -> Duration {
        if err.kind() == ErrorKind::RateLimited {
            err.retry_after().unwrap_or(self.default_retry_after)
        } else {
            self.next_delay(ctx.attempt)
        }
    }

    /// Decide whether the call should be attempted again, and with what
    /// delay. `None` means stop: attempts are exhausted, the error is
    /// not retryable, or the delay would cross the deadline.
    pub(crate) fn should_retry(&self, ctx: &RetryContext, err: &Error) -> Option<Duration> {
        if ctx.attempt >= self.max_attempts {
            return None;
        }

        if !err.retryable() {
            return None;
        }

        let delay = self.delay_for(ctx, err);

        if Instant::now() + delay > ctx.deadline {
            return None;
        }

        Some(delay)
    }

    /// Suspend for `delay`, racing the request deadline. An expired
    /// deadline surfaces immediately as a timeout instead of retrying.
    pub(crate) async fn pause(&self, ctx: &mut RetryContext, delay: Duration) -> Result<(), Error> {
        let wake = Instant::now() + delay;

        if wake > ctx.deadline {
            sleep_until(ctx.deadline).await;
            return Err(deadline_exceeded());
        }

        sleep_until(wake).await;
        ctx.last_delay = delay;

        Ok(())
    }
}

/// The error surfaced when a logical request's deadline lapses. Marked
/// non-retryable so no layer re-attempts after it fires.
pub(crate) fn deadline_exceeded() -> Error {
    Error::from_source(ErrorKind::Timeout, "request deadline exceeded".into())
        .with_retryable(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retryable_err() -> Error {
        Error::from_kind(ErrorKind::Network)
    }

    #[test]
    fn delays_grow_exponentially_within_jitter_bounds() {
        let policy = BackoffPolicy::default();

        for attempt in 1..=10_u32 {
            let expected = policy
                .base
                .saturating_mul(1 << (attempt - 1))
                .min(policy.max);
            let delay = policy.next_delay(attempt);

            assert!(delay >= expected, "attempt {attempt}: {delay:?} < {expected:?}");
            assert!(
                delay <= expected.mul_f64(1.0 + JITTER_FRACTION),
                "attempt {attempt}: {delay:?} above jitter bound"
            );
        }
    }

    #[test]
    fn delays_never_exceed_cap_plus_jitter() {
        let policy = BackoffPolicy::default();

        for attempt in 1..=64_u32 {
            let delay = policy.next_delay(attempt);

            assert!(delay <= policy.max.mul_f64(1.0 + JITTER_FRACTION));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_stop_retries() {
        let policy = BackoffPolicy::default();
        let mut ctx = RetryContext::new(Instant::now() + Duration::from_secs(60));
        ctx.attempt = 1;

        let err = Error::from_kind(ErrorKind::Auth);

        assert!(policy.should_retry(&ctx, &err).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_ceiling_stops_retries() {
        let policy = BackoffPolicy::default();
        let mut ctx = RetryContext::new(Instant::now() + Duration::from_secs(60));
        ctx.attempt = policy.max_attempts;

        assert!(policy.should_retry(&ctx, &retryable_err()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_pressure_stops_retries() {
        let policy = BackoffPolicy::default();
        let mut ctx = RetryContext::new(Instant::now() + Duration::from_millis(100));
        ctx.attempt = 1;

        // base delay is 250ms; it cannot fit before the deadline.
        assert!(policy.should_retry(&ctx, &retryable_err()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_uses_server_suggested_delay() {
        let policy = BackoffPolicy::default();
        let mut ctx = RetryContext::new(Instant::now() + Duration::from_secs(60));
        ctx.attempt = 1;

        let err = Error::from_kind(ErrorKind::RateLimited)
            .with_retry_after(Some(Duration::from_secs(7)));

        assert_eq!(policy.should_retry(&ctx, &err), Some(Duration::from_secs(7)));

        let bare = Error::from_kind(ErrorKind::RateLimited);

        assert_eq!(
            policy.should_retry(&ctx, &bare),
            Some(policy.default_retry_after)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_records_the_applied_delay() {
        let policy = BackoffPolicy::default();
        let mut ctx = RetryContext::new(Instant::now() + Duration::from_secs(60));

        policy
            .pause(&mut ctx, Duration::from_millis(300))
            .await
            .expect("the delay fits the deadline");

        assert_eq!(ctx.last_delay, Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_fails_fast_past_the_deadline() {
        let policy = BackoffPolicy::default();
        let mut ctx = RetryContext::new(Instant::now() + Duration::from_millis(50));

        let outcome = policy.pause(&mut ctx, Duration::from_secs(5)).await;

        let err = outcome.expect_err("the deadline must cut the sleep short");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!err.retryable());
    }
}
