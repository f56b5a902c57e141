use chrono::Utc;
use tokio::time::Instant;

pub fn now_i64() -> i64 {
    Utc::now().timestamp()
}

pub fn get_instant() -> Instant {
    Instant::now()
}

/// Seconds left until `issued_at + ttl_seconds`, zero once passed.
pub fn remaining_seconds(issued_at: i64, ttl_seconds: u64, now: i64) -> u64 {
    let expires_at = issued_at.saturating_add(ttl_seconds as i64);
    expires_at.saturating_sub(now).max(0) as u64
}
