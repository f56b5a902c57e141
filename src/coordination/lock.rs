use tracing::{debug, warn};

use crate::observability::metrics::get_metrics;
use crate::store::SharedStore;
use crate::utils::constants::LOCK_KEY_PREFIX;

static ACQUIRED_MSG: &str = "acquired";
static CONTENDED_MSG: &str = "contended";
static ERROR_MSG: &str = "error";

pub fn lock_key(name: &str) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, name)
}

/// Cluster-wide advisory lock on top of the shared store.
///
/// The holder is whoever created `lock-<name>` first. The marker always
/// carries a lease, so a crashed holder blocks others for at most one
/// lease.
#[derive(Debug, Clone)]
pub struct DistributedLock<S> {
    store: S,
}

impl<S: SharedStore> DistributedLock<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// True when the caller now owns `name`. A store failure counts as
    /// not acquired.
    pub async fn acquire(&self, name: &str, lease_seconds: u64) -> bool {
        let metrics = get_metrics().await;
        match self.store.set_nx_ex(&lock_key(name), "", lease_seconds).await {
            Ok(true) => {
                metrics.lock_acquisitions.with_label_values(&[ACQUIRED_MSG]).inc();
                true
            }
            Ok(false) => {
                metrics.lock_acquisitions.with_label_values(&[CONTENDED_MSG]).inc();
                false
            }
            Err(err) => {
                warn!("lock acquire failed closed: {}", err);
                metrics.lock_acquisitions.with_label_values(&[ERROR_MSG]).inc();
                false
            }
        }
    }

    /// Best effort; the lease bounds the hold time when this fails.
    pub async fn release(&self, name: &str) -> bool {
        match self.store.del(&lock_key(name)).await {
            Ok(existed) => {
                if !existed {
                    debug!("lock marker was already gone on release");
                }
                existed
            }
            Err(err) => {
                warn!("lock release failed, lease will expire it: {}", err);
                false
            }
        }
    }

    /// Restarts the lease of a held lock. Only the current holder may call
    /// this.
    pub async fn renew(&self, name: &str, lease_seconds: u64) -> bool {
        match self.store.set_ex(&lock_key(name), lease_seconds, "").await {
            Ok(()) => true,
            Err(err) => {
                warn!("lock renewal failed: {}", err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoreError, StoreResult};
    use crate::store::memory_store::MemoryStore;
    use crate::store::Subscription;
    use std::time::Duration;

    #[derive(Clone)]
    struct UnreachableStore;

    impl SharedStore for UnreachableStore {
        async fn set_nx_ex(&self, _: &str, _: &str, _: u64) -> StoreResult<bool> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn get(&self, _: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set_ex(&self, _: &str, _: u64, _: &str) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn del(&self, _: &str) -> StoreResult<bool> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn publish(&self, _: &str, _: &str) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn subscribe(&self, _: Vec<String>) -> StoreResult<Subscription> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn only_one_holder_at_a_time() {
        let store = MemoryStore::new();
        let first = DistributedLock::new(store.clone());
        let second = DistributedLock::new(store);

        assert!(first.acquire("wx1-s1", 30).await);
        assert!(!second.acquire("wx1-s1", 30).await);
        assert!(second.acquire("wx2-s2", 30).await);

        assert!(first.release("wx1-s1").await);
        assert!(second.acquire("wx1-s1", 30).await);
    }

    #[tokio::test]
    async fn abandoned_lock_frees_after_lease() {
        let lock = DistributedLock::new(MemoryStore::new());
        assert!(lock.acquire("wx1-s1", 1).await);
        // holder "crashes": never releases
        assert!(!lock.acquire("wx1-s1", 1).await);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(lock.acquire("wx1-s1", 1).await);
    }

    #[tokio::test]
    async fn unreachable_store_fails_closed() {
        let lock = DistributedLock::new(UnreachableStore);
        assert!(!lock.acquire("wx1-s1", 30).await);
        assert!(!lock.release("wx1-s1").await);
        assert!(!lock.renew("wx1-s1", 30).await);
    }

    #[tokio::test]
    async fn renewal_extends_the_lease() {
        let lock = DistributedLock::new(MemoryStore::new());
        assert!(lock.acquire("wx1-s1", 1).await);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(lock.renew("wx1-s1", 1).await);
        tokio::time::sleep(Duration::from_millis(700)).await;
        // past the first lease, still held
        assert!(!lock.acquire("wx1-s1", 1).await);

        assert!(lock.release("wx1-s1").await);
        assert!(lock.acquire("wx1-s1", 1).await);
    }
}
