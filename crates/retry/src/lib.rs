//! Cancellable retry policies for waiting on eventually-consistent cloud state.
//!
//! Every wait in the orchestrator (SSH reachability, liveness probes) goes
//! through [`retry`] so that it has a bounded number of attempts, backs off
//! exponentially and can be aborted through a shared [`CancellationToken`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::{Error, Result};

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default delay before the second attempt.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Default upper bound on the delay between attempts.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default number of attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 120;

/// How often and for how long an operation is retried.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,

    /// Ceiling for the doubled delay.
    pub max_delay: Duration,

    /// Maximum number of attempts, or `None` to retry until cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

impl RetryPolicy {
    /// A fixed delay between attempts with no attempt limit.
    ///
    /// Only the cancellation token can stop a wait under this policy.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            max_attempts: None,
        }
    }

    /// Exponential backoff starting at `initial_delay`, doubling up to
    /// `max_delay`, for at most `max_attempts` attempts.
    #[must_use]
    pub const fn exponential(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts: Some(max_attempts),
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            if delay >= self.max_delay {
                break;
            }
            delay = delay.saturating_mul(2);
        }
        delay.min(self.max_delay)
    }

    /// Returns true if another attempt is allowed after `attempt` attempts.
    #[must_use]
    pub fn allows_another(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

/// Runs `op` until it succeeds, the policy is exhausted or `cancel` fires.
///
/// `op` receives the 1-based attempt number. Cancellation is observed both
/// while an attempt is in flight and while sleeping between attempts.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] if the token fires first, or
/// [`Error::Exhausted`] with the last attempt's error once the policy runs
/// out of attempts.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        attempt += 1;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = op(attempt) => outcome,
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", what, attempt);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !policy.allows_another(attempt) {
            warn!("{} failed after {} attempts: {}", what, attempt, err);
            return Err(Error::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.delay_after(attempt);
        debug!(
            "{} attempt {} failed: {}; retrying in {:?}",
            what, attempt, err, delay
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    #[test]
    fn test_delay_doubles_up_to_ceiling() {
        let policy =
            RetryPolicy::exponential(Duration::from_secs(5), Duration::from_secs(30), 10);

        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_secs(10));
        assert_eq!(policy.delay_after(3), Duration::from_secs(20));
        assert_eq!(policy.delay_after(4), Duration::from_secs(30));
        assert_eq!(policy.delay_after(50), Duration::from_secs(30));
    }

    #[test]
    fn test_fixed_policy_is_unbounded() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5));

        assert_eq!(policy.delay_after(7), Duration::from_secs(5));
        assert!(policy.allows_another(u32::MAX - 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result: Result<u32, String> = retry(&policy, &cancel, "flaky", |attempt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err("not yet".to_string())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reports_last_error() {
        let policy =
            RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(4), 3);
        let cancel = CancellationToken::new();

        let result: Result<(), String> = retry(&policy, &cancel, "doomed", |attempt| async move {
            Err(format!("failure {attempt}"))
        })
        .await;

        match result {
            Err(Error::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "failure 3");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(12)).await;
            canceller.cancel();
        });

        let result: Result<(), &str> =
            retry(&policy, &cancel, "forever", |_| async { Err("down") }).await;

        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), &str> = retry(&policy, &cancel, "never", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
