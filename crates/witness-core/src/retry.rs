//! Retry utilities with exponential backoff.
//!
//! Two delay shapes are used in the pipeline: the transport retries with
//! AWS-style full jitter (`random(0, base * 2^(n-1))`), and the flush
//! wrapper retries with plain capped exponential delays. Both are expressed
//! through [`RetryPolicy`].

use std::time::{Duration, Instant};

/// Jitter strategy applied to a computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// No jitter; the delay is exactly `min(cap, base * 2^(n-1))`.
    None,
    /// Full jitter; the delay is `random(0, min(cap, base * 2^(n-1)))`.
    Full,
}

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay before the second attempt.
    pub base: Duration,
    /// Cap on the exponential growth.
    pub cap: Duration,
    /// Jitter strategy.
    pub jitter: Jitter,
}

impl RetryPolicy {
    /// Policy for ingest HTTP attempts: 5 attempts, full jitter, 250 ms base.
    #[must_use]
    pub fn transport() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_millis(250),
            cap: Duration::from_secs(8),
            jitter: Jitter::Full,
        }
    }

    /// Policy for flush retries: `500 * 2^(n-1)` ms capped at 4000 ms.
    #[must_use]
    pub fn flush(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base: Duration::from_millis(500),
            cap: Duration::from_millis(4000),
            jitter: Jitter::None,
        }
    }

    /// Compute the delay before the given attempt (1-based; the delay
    /// before attempt 1 is zero).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let exp = base_ms.saturating_mul(1u64.checked_shl(attempt - 2).unwrap_or(u64::MAX));
        let capped = exp.min(u64::try_from(self.cap.as_millis()).unwrap_or(u64::MAX));
        let delayed = match self.jitter {
            Jitter::None => capped,
            Jitter::Full => {
                if capped == 0 {
                    0
                } else {
                    fastrand::u64(0..=capped)
                }
            },
        };
        Duration::from_millis(delayed)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    #[must_use]
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Result of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed on every permitted attempt, or hit a permanent error.
    Exhausted {
        /// The final error.
        error: E,
        /// Total attempts made.
        attempts: u32,
    },
    /// The deadline elapsed before another attempt could be scheduled.
    DeadlineElapsed {
        /// The most recent error.
        error: E,
        /// Total attempts made.
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// True if the operation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Convert to a `Result`, discarding attempt counts.
    #[allow(clippy::missing_errors_doc)]
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Exhausted { error, .. } | Self::DeadlineElapsed { error, .. } => Err(error),
        }
    }
}

/// Execute an async operation with retry and exponential backoff.
///
/// `should_retry` receives each error and decides whether another attempt is
/// worthwhile; return `false` for permanent failures. When `deadline` is set,
/// no attempt is scheduled past it.
pub async fn retry<T, E, Fut, F, P>(
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    mut operation: F,
    should_retry: P,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation(attempts).await {
            Ok(value) => return RetryOutcome::Success(value),
            Err(error) => {
                if !policy.allows_another(attempts) || !should_retry(&error) {
                    return RetryOutcome::Exhausted { error, attempts };
                }
                let delay = policy.delay_for_attempt(attempts + 1);
                if let Some(deadline) = deadline {
                    if Instant::now() + delay >= deadline {
                        return RetryOutcome::DeadlineElapsed { error, attempts };
                    }
                }
                tokio::time::sleep(delay).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_delays_double_and_cap() {
        let policy = RetryPolicy::flush(5);
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(4000));
    }

    #[test]
    fn transport_delays_bounded_by_full_jitter_window() {
        let policy = RetryPolicy::transport();
        for _ in 0..100 {
            assert!(policy.delay_for_attempt(2) <= Duration::from_millis(250));
            assert!(policy.delay_for_attempt(3) <= Duration::from_millis(500));
            assert!(policy.delay_for_attempt(4) <= Duration::from_millis(1000));
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(4),
            jitter: Jitter::None,
        };
        let outcome = retry(
            &policy,
            None,
            |attempt| async move {
                if attempt < 3 {
                    Err("transient")
                } else {
                    Ok("recovered")
                }
            },
            |_| true,
        )
        .await;
        assert_eq!(outcome, RetryOutcome::Success("recovered"));
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(2),
            jitter: Jitter::None,
        };
        let outcome = retry(
            &policy,
            None,
            |_| async { Err::<(), _>("always") },
            |_| true,
        )
        .await;
        assert!(matches!(
            outcome,
            RetryOutcome::Exhausted {
                error: "always",
                attempts: 3
            }
        ));
    }

    #[tokio::test]
    async fn permanent_errors_stop_immediately() {
        let policy = RetryPolicy::flush(5);
        let outcome = retry(
            &policy,
            None,
            |_| async { Err::<(), _>("permanent") },
            |_| false,
        )
        .await;
        assert!(matches!(
            outcome,
            RetryOutcome::Exhausted {
                error: "permanent",
                attempts: 1
            }
        ));
    }

    #[tokio::test]
    async fn deadline_prevents_further_attempts() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base: Duration::from_millis(50),
            cap: Duration::from_millis(50),
            jitter: Jitter::None,
        };
        let deadline = Instant::now() + Duration::from_millis(10);
        let outcome = retry(
            &policy,
            Some(deadline),
            |_| async { Err::<(), _>("slow") },
            |_| true,
        )
        .await;
        assert!(matches!(outcome, RetryOutcome::DeadlineElapsed { .. }));
    }
}
