//! Shared store contract
//!
//! Key-value operations with expiry plus publish/subscribe, reachable by
//! every service instance. Redis in production, an in-process store for
//! single-node runs and tests.

use std::future::Future;

use tokio::sync::mpsc;

use crate::config::settings::StoreConfig;
use crate::error::StoreResult;

pub mod memory_store;
pub mod redis_store;

use memory_store::MemoryStore;
use redis_store::RedisStore;

/// Buffer of a subscription channel between the store and its consumer.
pub const SUBSCRIPTION_BUFFER: usize = 64;

/// One pub/sub delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMessage {
    pub channel: String,
    pub payload: String,
}

/// Messages for the channels passed to [`SharedStore::subscribe`].
/// Ends when the store side is gone.
pub type Subscription = mpsc::Receiver<StoreMessage>;

pub trait SharedStore: Clone + Send + Sync + 'static {
    /// `SET key value NX EX seconds`: create only if absent, with expiry, atomically.
    fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        seconds: u64,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = StoreResult<Option<String>>> + Send;

    fn set_ex(
        &self,
        key: &str,
        seconds: u64,
        value: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Returns whether the key existed.
    fn del(&self, key: &str) -> impl Future<Output = StoreResult<bool>> + Send;

    fn publish(&self, channel: &str, payload: &str) -> impl Future<Output = StoreResult<()>> + Send;

    fn subscribe(
        &self,
        channels: Vec<String>,
    ) -> impl Future<Output = StoreResult<Subscription>> + Send;
}

/// Store backend selected by configuration.
#[derive(Debug, Clone)]
pub enum StoreKind {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl StoreKind {
    pub async fn connect(cfg: &StoreConfig) -> StoreResult<Self> {
        match cfg {
            StoreConfig::Redis { url } => Ok(StoreKind::Redis(RedisStore::connect(url).await?)),
            StoreConfig::Memory => Ok(StoreKind::Memory(MemoryStore::new())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StoreKind::Redis(_) => "redis",
            StoreKind::Memory(_) => "memory",
        }
    }
}

impl SharedStore for StoreKind {
    async fn set_nx_ex(&self, key: &str, value: &str, seconds: u64) -> StoreResult<bool> {
        match self {
            StoreKind::Redis(s) => s.set_nx_ex(key, value, seconds).await,
            StoreKind::Memory(s) => s.set_nx_ex(key, value, seconds).await,
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self {
            StoreKind::Redis(s) => s.get(key).await,
            StoreKind::Memory(s) => s.get(key).await,
        }
    }

    async fn set_ex(&self, key: &str, seconds: u64, value: &str) -> StoreResult<()> {
        match self {
            StoreKind::Redis(s) => s.set_ex(key, seconds, value).await,
            StoreKind::Memory(s) => s.set_ex(key, seconds, value).await,
        }
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        match self {
            StoreKind::Redis(s) => s.del(key).await,
            StoreKind::Memory(s) => s.del(key).await,
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        match self {
            StoreKind::Redis(s) => s.publish(channel, payload).await,
            StoreKind::Memory(s) => s.publish(channel, payload).await,
        }
    }

    async fn subscribe(&self, channels: Vec<String>) -> StoreResult<Subscription> {
        match self {
            StoreKind::Redis(s) => s.subscribe(channels).await,
            StoreKind::Memory(s) => s.subscribe(channels).await,
        }
    }
}
