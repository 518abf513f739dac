//! Bounded retries under an overall deadline.
//!
//! Every store call made by the write coordinator and the query router is
//! wrapped in `tokio::time::timeout` with whatever is left of the
//! operation's deadline, and transient failures are retried with
//! exponential backoff plus jitter. Retries never outlive the deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::storage::{StoreError, StoreResult};

/// Default number of attempts per store call (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY_MS: u64 = 50;
/// Default cap on a single backoff delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 1_000;
/// Default overall deadline for one coordinator or router operation.
pub const DEFAULT_DEADLINE_MS: u64 = 10_000;

/// Retry and timeout settings shared by writers and readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per store call, first try included (minimum 1)
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on every further retry
    pub base_delay: Duration,

    /// Upper bound for a single backoff delay
    pub max_delay: Duration,

    /// Overall time budget of one operation, retries included
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            deadline: Duration::from_millis(DEFAULT_DEADLINE_MS),
        }
    }
}

impl RetryPolicy {
    /// Start the clock for one operation.
    pub fn start(&self) -> Deadline {
        Deadline::after(self.deadline)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (0-based), jitter included.
    ///
    /// The un-jittered delay is `base_delay * 2^retry`, capped at `max_delay`;
    /// up to a quarter of it is added as jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let cap_ms = self.max_delay.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(1u64 << retry.min(20))
            .min(cap_ms);
        let jitter_ms = match delay_ms / 4 {
            0 => 0,
            spread => rand::random::<u64>() % spread,
        };
        Duration::from_millis(delay_ms + jitter_ms)
    }

    /// Sleep before retry number `retry` unless that would run past `deadline`.
    ///
    /// # Returns
    /// `false` when there is no time left for another attempt
    pub async fn pause(&self, retry: u32, deadline: &Deadline) -> bool {
        let delay = self.backoff(retry);
        if delay >= deadline.remaining() {
            return false;
        }
        tokio::time::sleep(delay).await;
        true
    }
}

/// Absolute point in time by which an operation must finish.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
        }
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Run one store call with whatever is left of `deadline`.
///
/// # Errors
/// Returns `StoreError::Timeout` when the deadline is already spent or the
/// call does not finish in time; otherwise the call's own result.
pub async fn within_deadline<T, F>(deadline: &Deadline, operation: &str, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    let remaining = deadline.remaining();
    if remaining.is_zero() {
        return Err(StoreError::Timeout(format!(
            "{}: operation deadline exhausted",
            operation
        )));
    }

    match tokio::time::timeout(remaining, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(format!(
            "{}: no response within {:?}",
            operation, remaining
        ))),
    }
}

/// Run a store call, retrying transient failures with backoff.
///
/// Non-retryable errors are returned immediately. When attempts or time run
/// out, the last error is returned.
///
/// # Arguments
/// * `policy` - Attempt count and backoff shape
/// * `deadline` - Overall deadline shared with sibling calls
/// * `operation` - Label used in logs and timeout messages
/// * `call` - Produces a fresh future for every attempt
pub async fn retry_call<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: &Deadline,
    operation: &str,
    mut call: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match within_deadline(deadline, operation, call()).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                if attempt >= attempts || !policy.pause(attempt - 1, deadline).await {
                    warn!("{} failed after {} attempt(s): {}", operation, attempt, e);
                    return Err(e);
                }
                debug!("{} attempt {} failed, retrying: {}", operation, attempt, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            deadline: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            ..RetryPolicy::default()
        };

        let first = policy.backoff(0);
        assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(125));

        let second = policy.backoff(1);
        assert!(second >= Duration::from_millis(200) && second < Duration::from_millis(250));

        let capped = policy.backoff(10);
        assert!(capped >= Duration::from_millis(400) && capped < Duration::from_millis(500));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), 1);
    }

    #[tokio::test]
    async fn test_retry_call_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = fast_policy();
        let deadline = policy.start();

        let result = retry_call(&policy, &deadline, "get", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::Throttled("slow down".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_call_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = fast_policy();
        let deadline = policy.start();

        let result: StoreResult<()> = retry_call(&policy, &deadline, "put", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("down".into()))
        })
        .await;

        assert_eq!(result, Err(StoreError::Unavailable("down".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = fast_policy();
        let deadline = policy.start();

        let result: StoreResult<()> = retry_call(&policy, &deadline, "put", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Serialization("bad".into()))
        })
        .await;

        assert!(matches!(result, Err(StoreError::Serialization(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out_within_deadline() {
        let policy = RetryPolicy {
            deadline: Duration::from_millis(50),
            ..fast_policy()
        };
        let deadline = policy.start();
        let started = Instant::now();

        let result: StoreResult<()> = retry_call(&policy, &deadline, "query", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(StoreError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_expired_deadline_fails_fast() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        let result = within_deadline(&deadline, "get", async { Ok(1) }).await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }
}
