use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreResult;
use crate::store::{SharedStore, Subscription};

static INSTANCE_SEQ: AtomicU64 = AtomicU64::new(0);

/// What a refresh wave announces to sibling instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum NotifyEvent {
    /// A new token is in the store.
    Refreshed { issued_at: i64 },
    /// The wave gave up after `attempts` fetches.
    Failed { attempts: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyMessage {
    /// instance that ran the wave
    pub origin: String,
    #[serde(flatten)]
    pub event: NotifyEvent,
}

/// Cross-instance pub/sub, one channel per app key.
#[derive(Debug, Clone)]
pub struct Notifier<S> {
    store: S,
    instance_id: String,
}

impl<S: SharedStore> Notifier<S> {
    pub fn new(store: S) -> Self {
        let seq = INSTANCE_SEQ.fetch_add(1, Ordering::Relaxed);
        let started = chrono::Utc::now().timestamp_millis();
        Self {
            store,
            instance_id: format!("{}-{}-{}", std::process::id(), started, seq),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_own(&self, message: &NotifyMessage) -> bool {
        message.origin == self.instance_id
    }

    /// Failures are logged only: siblings then fall back to their wait bound.
    pub async fn announce(&self, app_key: &str, event: NotifyEvent) {
        let message = NotifyMessage {
            origin: self.instance_id.clone(),
            event,
        };
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("cannot encode notification: {}", err);
                return;
            }
        };
        if let Err(err) = self.store.publish(app_key, &payload).await {
            warn!("cannot publish notification: {}", err);
        }
    }

    /// Open the subscription for all given app keys.
    pub async fn subscribe(&self, app_keys: Vec<String>) -> StoreResult<Subscription> {
        self.store.subscribe(app_keys).await
    }

    pub fn decode(payload: &str) -> Option<NotifyMessage> {
        serde_json::from_str(payload)
            .inspect_err(|err| warn!("ignoring malformed notification: {}", err))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_store::MemoryStore;

    #[test]
    fn wire_format_is_flat_json() {
        let message = NotifyMessage {
            origin: "1-2-3".into(),
            event: NotifyEvent::Refreshed { issued_at: 1_700_000_000 },
        };
        let payload = serde_json::to_value(&message).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({"origin": "1-2-3", "event": "refreshed", "issued_at": 1_700_000_000})
        );
    }

    #[test]
    fn decodes_failures_and_rejects_garbage() {
        let decoded =
            Notifier::<MemoryStore>::decode(r#"{"origin":"x","event":"failed","attempts":5,"reason":"down"}"#).unwrap();
        assert_eq!(decoded.event, NotifyEvent::Failed { attempts: 5, reason: "down".into() });
        assert!(Notifier::<MemoryStore>::decode("T1").is_none());
    }

    #[tokio::test]
    async fn instances_tell_their_own_messages_apart() {
        let store = MemoryStore::new();
        let first = Notifier::new(store.clone());
        let second = Notifier::new(store);
        assert_ne!(first.instance_id(), second.instance_id());

        let mut sub = second.subscribe(vec!["wx1-s1".into()]).await.unwrap();
        first.announce("wx1-s1", NotifyEvent::Refreshed { issued_at: 10 }).await;

        let message = Notifier::<MemoryStore>::decode(&sub.recv().await.unwrap().payload).unwrap();
        assert!(first.is_own(&message));
        assert!(!second.is_own(&message));
    }
}
