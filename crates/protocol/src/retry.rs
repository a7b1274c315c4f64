//! Bounded exponential backoff with jitter for transient failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::error::SwapError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Deadline for a single attempt.
    pub timeout: Duration,
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_ms: 250,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exp = u32::try_from(attempt).unwrap_or(u32::MAX);
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(exp));
        let capped = std::cmp::min(backoff, self.max_delay);
        let jitter = if self.jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
        };
        capped + jitter
    }
}

/// Runs `action` until it succeeds, fails permanently, or retries run out.
///
/// Only transient errors and per-attempt timeouts are retried. The last
/// transient error is returned once retries are exhausted; callers decide
/// whether that stalls the swap.
///
/// # Errors
/// Returns the first permanent error or the last transient one.
pub async fn retry_with_timeout<T, F, Fut>(
    label: &'static str,
    config: &RetryConfig,
    mut action: F,
) -> Result<T, SwapError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SwapError>>,
{
    let attempts = config.max_retries.saturating_add(1);
    let mut attempt = 0;
    loop {
        let err = match timeout(config.timeout, action()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) if !err.is_transient() => return Err(err),
            Ok(Err(err)) => err,
            Err(_) => SwapError::TimeoutBreach(format!("{label} timed out")),
        };

        attempt += 1;
        if attempt >= attempts {
            return Err(err);
        }
        warn!(attempt, error = %err, "{label} failed; retrying");
        sleep(config.backoff(attempt - 1)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn config(max_retries: usize) -> RetryConfig {
        RetryConfig {
            timeout: Duration::from_millis(50),
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_ms: 0,
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = retry_with_timeout("test", &config(2), move || {
            let calls = counter.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                    Err(SwapError::Transport("peer offline".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = retry_with_timeout("test", &config(5), move || {
            let calls = counter.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SwapError::ProtocolViolation("bad proof".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(SwapError::ProtocolViolation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn times_out_and_exhausts_retries() {
        let mut config = config(1);
        config.timeout = Duration::from_millis(5);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = retry_with_timeout("slow", &config, move || {
            let calls = counter.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                Ok::<_, SwapError>(())
            }
        })
        .await;
        assert!(matches!(result, Err(SwapError::TimeoutBreach(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            jitter_ms: 0,
            ..RetryConfig::default()
        };
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(5), Duration::from_millis(250));
        assert_eq!(config.backoff(usize::MAX), Duration::from_millis(250));
    }
}
