//! Shared constants and invariants

/// Validity window of a token issued by the authority.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 7200;
pub const DEFAULT_SAFETY_MARGIN_SECS: u64 = 200;
pub const DEFAULT_REFRESH_AHEAD_SECS: u64 = 60;
pub const DEFAULT_LOCK_LEASE_SECS: u64 = 30;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5000;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3000;

// Shared store key prefixes
pub const TOKEN_KEY_PREFIX: &str = "token-";
pub const TIME_KEY_PREFIX: &str = "time-";
pub const LOCK_KEY_PREFIX: &str = "lock-";

// Authority query
pub const GRANT_TYPE: &str = "client_credential";
pub const ACCESS_TOKEN_FIELD: &str = "access_token";
