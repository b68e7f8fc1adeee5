//! Bounded retry with exponential backoff

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::http::http_config;
use crate::shutdown::{shutdown_flag, sleep_unless};

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::error::HttpError {
    fn is_retryable(&self) -> bool {
        crate::error::HttpError::is_retryable(self)
    }
}

/// Retry budget for one kind of network operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// Delay before retry n is `base_delay * 2^(n-1)`
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// No retries, no delay
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Policy from the global [`HttpConfig`](crate::http::HttpConfig)
    pub fn from_http_config() -> Self {
        let config = http_config();
        Self::new(config.max_retries, config.backoff_base)
    }

    /// Exponential backoff: base, 2*base, 4*base, ...
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Retry a fallible operation with exponential backoff.
///
/// Retryable errors are logged and retried up to `policy.max_retries` times.
/// Returns `Ok(T)` on first success, or the final `Err` on exhaustion /
/// non-retryable error. A shutdown request ends the backoff early and
/// returns the last error.
pub fn retry_with_backoff<T, E>(
    label: &str,
    policy: &RetryPolicy,
    attempt_fn: impl FnMut() -> Result<T, E>,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
{
    retry_with_backoff_until(label, policy, shutdown_flag(), attempt_fn)
}

/// [`retry_with_backoff`] that stops retrying once `cancel` is set.
pub fn retry_with_backoff_until<T, E>(
    label: &str,
    policy: &RetryPolicy,
    cancel: &AtomicBool,
    mut attempt_fn: impl FnMut() -> Result<T, E>,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_retries && e.is_retryable() => {
                attempt += 1;
                let delay = policy.backoff_duration(attempt);
                log::warn!(
                    "{label}: attempt {attempt}/{} failed: {e}, retrying in {delay:?}",
                    policy.max_retries
                );
                if !sleep_unless(cancel, delay) {
                    log::warn!("{label}: shutdown requested, giving up: {e}");
                    return Err(e);
                }
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct TestErr(bool);

    impl std::fmt::Display for TestErr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable={})", self.0)
        }
    }

    impl Retryable for TestErr {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn backoff_exponential() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        assert_eq!(policy.backoff_duration(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_duration(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_duration(3), Duration::from_secs(8));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result = retry_with_backoff("test", &policy, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(TestErr(true))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let result: Result<(), _> = retry_with_backoff("test", &policy, || {
            calls.set(calls.get() + 1);
            Err(TestErr(true))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn non_retryable_fails_immediately() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let result: Result<(), _> = retry_with_backoff("test", &policy, || {
            calls.set(calls.get() + 1);
            Err(TestErr(false))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn none_policy_single_attempt() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_with_backoff("test", &RetryPolicy::none(), || {
            calls.set(calls.get() + 1);
            Err(TestErr(true))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn cancel_stops_backoff() {
        let calls = Cell::new(0);
        let cancel = AtomicBool::new(false);
        let policy = RetryPolicy::new(5, Duration::from_secs(60));
        let start = std::time::Instant::now();
        let result: Result<(), _> = retry_with_backoff_until("test", &policy, &cancel, || {
            calls.set(calls.get() + 1);
            cancel.store(true, std::sync::atomic::Ordering::Relaxed);
            Err(TestErr(true))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
