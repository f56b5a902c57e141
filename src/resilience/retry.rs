use tokio::time::{sleep, Duration};
use tracing::{error, warn};

use crate::config::settings::RetryConfig;
use crate::error::TokenError;

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl From<&RetryConfig> for RetrySettings {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            attempts: cfg.attempts.max(1),
            base_delay_ms: cfg.base_delay_ms,
            max_delay_ms: cfg.max_delay_ms.max(cfg.base_delay_ms),
        }
    }
}

impl RetrySettings {
    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or `attempts` is reached. Exhaustion turns the last retryable error
    /// into [`TokenError::RetryExhausted`].
    pub async fn run_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T, TokenError>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, TokenError>>,
    {
        let mut delay = self.base_delay_ms;
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt < self.attempts => {
                    warn!("Attempt {attempt}/{} failed: {e}", self.attempts);
                    sleep(Duration::from_millis(delay)).await;
                    delay = (delay * 2).min(self.max_delay_ms);
                    attempt += 1;
                }
                Err(e) => {
                    error!("all {attempt} attempts failed: {e}");
                    return Err(TokenError::RetryExhausted {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings(attempts: u32) -> RetrySettings {
        RetrySettings { attempts, base_delay_ms: 1, max_delay_ms: 4 }
    }

    #[tokio::test]
    async fn stops_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = settings(5)
            .run_with_retry(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TokenError::FetchFailed("down".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match result {
            Err(TokenError::RetryExhausted { attempts, reason }) => {
                assert_eq!(attempts, 5);
                assert!(reason.contains("down"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn returns_first_success() {
        let result = settings(5)
            .run_with_retry(|attempt| async move {
                if attempt < 3 {
                    Err(TokenError::FetchFailed("transient".into()))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn non_retryable_errors_skip_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = settings(5)
            .run_with_retry(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TokenError::StoreUnavailable("refused".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result, Err(TokenError::StoreUnavailable("refused".into())));
    }

    #[test]
    fn config_conversion_keeps_invariants() {
        let settings = RetrySettings::from(&RetryConfig { attempts: 0, base_delay_ms: 500, max_delay_ms: 100 });
        assert_eq!(settings.attempts, 1);
        assert_eq!(settings.max_delay_ms, 500);
    }
}
