use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::{SharedStore, StoreMessage, Subscription, SUBSCRIPTION_BUFFER};

const BUS_CAPACITY: usize = 256;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now < at).unwrap_or(true)
    }
}

#[derive(Debug)]
struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    bus: broadcast::Sender<StoreMessage>,
}

/// In-process shared store.
///
/// Clones share state, so several coordinators built on clones of one
/// store behave like separate instances attached to the same Redis.
/// Expired entries are dropped lazily when touched.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                bus,
            }),
        }
    }

    fn entries(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Entry>>> {
        self.inner
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_owned()))
    }

    fn live_entry<'a>(map: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
        let now = Instant::now();
        if map.get(key).is_some_and(|entry| !entry.is_live(now)) {
            map.remove(key);
        }
        map.get(key)
    }
}

impl SharedStore for MemoryStore {
    async fn set_nx_ex(&self, key: &str, value: &str, seconds: u64) -> StoreResult<bool> {
        let mut map = self.entries()?;
        if Self::live_entry(&mut map, key).is_some() {
            return Ok(false);
        }
        map.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: Some(Instant::now() + Duration::from_secs(seconds)),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut map = self.entries()?;
        Ok(Self::live_entry(&mut map, key).map(|entry| entry.value.clone()))
    }

    async fn set_ex(&self, key: &str, seconds: u64, value: &str) -> StoreResult<()> {
        let mut map = self.entries()?;
        map.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: Some(Instant::now() + Duration::from_secs(seconds)),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut map = self.entries()?;
        let existed = Self::live_entry(&mut map, key).is_some();
        map.remove(key);
        Ok(existed)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        let message = StoreMessage {
            channel: channel.to_owned(),
            payload: payload.to_owned(),
        };
        // no subscribers is not an error, same as redis PUBLISH returning 0
        let _ = self.inner.bus.send(message);
        Ok(())
    }

    async fn subscribe(&self, channels: Vec<String>) -> StoreResult<Subscription> {
        let channels: HashSet<String> = channels.into_iter().collect();
        let mut bus_rx = self.inner.bus.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok(message) => {
                        if !channels.contains(&message.channel) {
                            continue;
                        }
                        if tx.send(message).await.is_err() {
                            debug!("memory store subscriber dropped");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("memory store subscriber lagged, {} messages skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_only_creates_absent_keys() {
        let store = MemoryStore::new();
        assert!(store.set_nx_ex("lock-a", "", 30).await.unwrap());
        assert!(!store.set_nx_ex("lock-a", "", 30).await.unwrap());
        assert!(store.del("lock-a").await.unwrap());
        assert!(!store.del("lock-a").await.unwrap());
        assert!(store.set_nx_ex("lock-a", "", 30).await.unwrap());
    }

    #[tokio::test]
    async fn entries_expire() {
        let store = MemoryStore::new();
        store.set_ex("token-a", 1, "T1").await.unwrap();
        assert_eq!(store.get("token-a").await.unwrap().as_deref(), Some("T1"));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.get("token-a").await.unwrap(), None);
        assert!(store.set_nx_ex("token-a", "T2", 1).await.unwrap());
    }

    #[tokio::test]
    async fn clones_share_entries_and_messages() {
        let first = MemoryStore::new();
        let second = first.clone();

        let mut sub = second.subscribe(vec!["app-a".to_owned()]).await.unwrap();
        first.set_ex("token-a", 60, "T1").await.unwrap();
        first.publish("app-b", "ignored").await.unwrap();
        first.publish("app-a", "refreshed").await.unwrap();

        assert_eq!(second.get("token-a").await.unwrap().as_deref(), Some("T1"));
        let message = sub.recv().await.unwrap();
        assert_eq!(message.channel, "app-a");
        assert_eq!(message.payload, "refreshed");
    }
}
