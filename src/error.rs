use thiserror::Error;

/// Failure of the shared key-value / pub-sub store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("shared store unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome kinds surfaced to callers of the coordinator.
///
/// `Clone` because a single refresh outcome is fanned out to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The application is not in the registry. Never retried.
    #[error("application is not registered")]
    Unregistered,

    /// The remote authority call failed or returned no token.
    #[error("token fetch failed: {0}")]
    FetchFailed(String),

    /// Every attempt of a refresh wave failed.
    #[error("token refresh failed after {attempts} attempts, retry later or check appid and appsecret: {reason}")]
    RetryExhausted { attempts: u32, reason: String },

    #[error("shared store unavailable: {0}")]
    StoreUnavailable(String),

    /// No outcome arrived within the wait bound (e.g. the lock holder crashed).
    #[error("no token outcome within {waited_ms} ms")]
    WaitTimedOut { waited_ms: u64 },

    #[error("token coordinator is shutting down")]
    Closed,
}

impl TokenError {
    /// Only fetch failures are retried inside a refresh wave.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TokenError::FetchFailed(_))
    }
}

impl From<StoreError> for TokenError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => TokenError::StoreUnavailable(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fetch_failures_are_retryable() {
        assert!(TokenError::FetchFailed("boom".into()).is_retryable());
        assert!(!TokenError::Unregistered.is_retryable());
        assert!(!TokenError::StoreUnavailable("down".into()).is_retryable());
        assert!(!TokenError::RetryExhausted { attempts: 5, reason: "x".into() }.is_retryable());
    }

    #[test]
    fn store_errors_map_to_store_unavailable() {
        let err: TokenError = StoreError::Unavailable("connection refused".into()).into();
        assert_eq!(err, TokenError::StoreUnavailable("connection refused".into()));
    }
}
