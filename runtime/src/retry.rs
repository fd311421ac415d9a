//! Retry utilities for transient failures.
//!
//! Two shapes of retry exist in the consistency layer:
//!
//! - **Bounded, fixed interval** — per-message handler retries. The reference
//!   policy is 5 attempts at 5-second intervals; exhaustion routes the
//!   message to the dead-letter queue.
//! - **Unbounded, capped backoff** — catch-up synchronization and outbox
//!   draining. These must never give up: the delay grows from the base
//!   interval up to a ceiling and stays there until the dependency recovers.
//!
//! Sleeps suspend only the retrying task, never the whole runtime.

use std::time::Duration;
use tokio::time::sleep;

/// Bounded fixed-interval retry policy for per-message handling.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total handler invocations before giving up (including the first).
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::interval(5, Duration::from_secs(5))
    }
}

impl RetryPolicy {
    /// Create a policy with `max_attempts` invocations spaced by `interval`.
    #[must_use]
    pub const fn interval(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

impl From<&gavel_core::config::ConsumerConfig> for RetryPolicy {
    fn from(config: &gavel_core::config::ConsumerConfig) -> Self {
        Self::interval(config.retry_attempts, config.retry_interval())
    }
}

/// Retry an async operation under a bounded fixed-interval policy.
///
/// `is_retryable` decides whether an error is transient; a non-retryable
/// error fails immediately without consuming further attempts.
///
/// # Errors
///
/// Returns the last error together with the number of attempts made, either
/// when the error is not retryable or when the policy is exhausted.
pub async fn retry_fixed<F, Fut, T, E, P>(
    policy: RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(error = %err, "Error is not retryable, failing immediately");
                    return Err((err, attempt));
                }

                if attempt >= policy.max_attempts {
                    tracing::error!(attempt, error = %err, "Operation failed after max attempts");
                    return Err((err, attempt));
                }

                tracing::warn!(
                    attempt,
                    delay_ms = policy.interval.as_millis(),
                    error = %err,
                    "Operation failed, retrying"
                );
                sleep(policy.interval).await;
            }
        }
    }
}

/// Retry an async operation indefinitely with a capped backoff.
///
/// The delay starts at `interval`, doubles on each consecutive failure, and
/// never exceeds `ceiling`. Returns only on success; the caller is expected
/// to race this against a shutdown signal if it must be cancellable.
pub async fn retry_forever<F, Fut, T, E>(
    interval: Duration,
    ceiling: Duration,
    mut operation: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = interval;
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return result;
            }
            Err(err) => {
                attempt += 1;
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying indefinitely"
                );
                sleep(delay).await;
                delay = (delay * 2).min(ceiling);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_policy_matches_reference() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.interval, Duration::from_secs(5));
    }

    #[test]
    fn policy_derives_from_consumer_config() {
        let config = gavel_core::config::ConsumerConfig {
            service: "search".to_string(),
            retry_attempts: 3,
            retry_interval_secs: 2,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.interval, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let result = retry_fixed(
            RetryPolicy::interval(3, Duration::from_millis(10)),
            || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(42)
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let result = retry_fixed(
            RetryPolicy::interval(5, Duration::from_millis(5)),
            || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(42)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_exactly_max_attempts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let result = retry_fixed(
            RetryPolicy::interval(5, Duration::from_millis(1)),
            || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("persistent failure".to_string())
                }
            },
            |_| true,
        )
        .await;

        let (_, attempts) = result.err().unwrap_or(("".to_string(), 0));
        assert_eq!(attempts, 5);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let result = retry_fixed(
            RetryPolicy::default(),
            || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("permanent".to_string())
                }
            },
            |err: &String| !err.contains("permanent"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_forever_returns_on_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let result = retry_forever(
            Duration::from_millis(1),
            Duration::from_millis(4),
            || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err("down".to_string())
                    } else {
                        Ok("up")
                    }
                }
            },
        )
        .await;

        assert_eq!(result, "up");
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
