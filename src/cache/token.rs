use crate::helpers::time::{now_i64, remaining_seconds};

/// A token as kept in the shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub value: String,
    /// UNIX seconds
    pub issued_at: i64,
    /// stored lifetime, safety margin already deducted
    pub ttl_seconds: u64,
}

impl TokenRecord {
    pub fn new(value: String, issued_at: i64, ttl_seconds: u64) -> Self {
        Self { value, issued_at, ttl_seconds }
    }

    pub fn expires_at(&self) -> i64 {
        self.issued_at.saturating_add(self.ttl_seconds as i64)
    }

    pub fn remaining_seconds(&self) -> u64 {
        remaining_seconds(self.issued_at, self.ttl_seconds, now_i64())
    }

    pub fn is_fresh(&self) -> bool {
        self.remaining_seconds() > 0
    }
}
