use crate::types::{ObservedError, RelayError, Result};
use std::future::Future;
use std::time::Duration;

/// Exponential backoff with ±25% jitter for transient network failures.
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let jitter_range = base_delay / 4;
        let jitter = if jitter_range > 0 {
            fastrand::i64(-(jitter_range as i64)..jitter_range as i64)
        } else {
            0
        };
        Duration::from_millis((base_delay as i64 + jitter).max(1) as u64)
    }

    pub async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match operation().await {
                Ok(val) => return Ok(val),
                Err(e) if attempts < self.max_attempts && Self::is_retryable(&e) => {
                    let delay = self.delay_for(attempts);
                    tracing::warn!(
                        "Request failed (attempt {}): {}. Retrying in {:?}",
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn is_retryable(err: &ObservedError) -> bool {
        match &err.inner {
            RelayError::Network(_) | RelayError::Io(_) => true,
            RelayError::Upstream(status, _) => {
                status.is_server_error() || *status == axum::http::StatusCode::TOO_MANY_REQUESTS
            }
            RelayError::RateLimited(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_grows_and_stays_within_jitter() {
        let policy = RetryPolicy::new(5, 100);
        for attempt in 1..=4 {
            let base = 100u64 * 2u64.pow(attempt - 1);
            let ms = policy.delay_for(attempt).as_millis() as u64;
            assert!(ms >= base - base / 4 && ms <= base + base / 4, "attempt {}: {}", attempt, ms);
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let policy = RetryPolicy::new(3, 1);
        let calls = AtomicU32::new(0);
        let result = policy
            .execute_with_retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ObservedError::from(RelayError::Upstream(
                            axum::http::StatusCode::BAD_GATEWAY,
                            "down".into(),
                        )))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert!(matches!(result, Ok(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let policy = RetryPolicy::new(3, 1);
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy
            .execute_with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ObservedError::from(RelayError::Unauthorized("bad token".into()))) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
