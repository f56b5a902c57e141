use tracing::{debug, warn};

use crate::cache::token::TokenRecord;
use crate::error::StoreResult;
use crate::helpers::time::now_i64;
use crate::store::SharedStore;
use crate::utils::constants::{TIME_KEY_PREFIX, TOKEN_KEY_PREFIX};

pub fn token_key(app_key: &str) -> String {
    format!("{}{}", TOKEN_KEY_PREFIX, app_key)
}

pub fn time_key(app_key: &str) -> String {
    format!("{}{}", TIME_KEY_PREFIX, app_key)
}

/// Token records in the shared store.
///
/// `token-<appKey>` holds the value and `time-<appKey>` the issuance
/// timestamp, both expiring after `ttl_seconds`. Remaining validity is
/// recomputed from the timestamp on every read.
#[derive(Debug, Clone)]
pub struct TokenStore<S> {
    store: S,
    ttl_seconds: u64,
}

impl<S: SharedStore> TokenStore<S> {
    pub fn new(store: S, ttl_seconds: u64) -> Self {
        Self { store, ttl_seconds }
    }

    /// Current record, `None` when absent or stale.
    pub async fn read(&self, app_key: &str) -> StoreResult<Option<TokenRecord>> {
        let Some(value) = self.store.get(&token_key(app_key)).await? else {
            return Ok(None);
        };
        let issued_at = match self.store.get(&time_key(app_key)).await? {
            Some(raw) => match raw.parse::<i64>() {
                Ok(issued_at) => issued_at,
                Err(_) => {
                    warn!("ignoring token with unreadable issuance time '{}'", raw);
                    return Ok(None);
                }
            },
            None => {
                debug!("token present without issuance time, treating as stale");
                return Ok(None);
            }
        };

        let record = TokenRecord::new(value, issued_at, self.ttl_seconds);
        Ok(record.is_fresh().then_some(record))
    }

    /// Store a freshly issued token.
    pub async fn write(&self, app_key: &str, value: &str) -> StoreResult<TokenRecord> {
        let record = TokenRecord::new(value.to_owned(), now_i64(), self.ttl_seconds);
        // token before time: a reader in between sees an older issuance and
        // only underestimates the remaining validity
        self.store.set_ex(&token_key(app_key), self.ttl_seconds, &record.value).await?;
        self.store
            .set_ex(&time_key(app_key), self.ttl_seconds, &record.issued_at.to_string())
            .await?;
        Ok(record)
    }
}
