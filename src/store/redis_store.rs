use std::fmt;
use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::StoreResult;
use crate::store::{SharedStore, StoreMessage, Subscription, SUBSCRIPTION_BUFFER};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Redis-backed shared store.
///
/// Commands go through a reconnecting [`ConnectionManager`]; every
/// subscription owns a dedicated pub/sub connection.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    manager: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        info!("connected to redis");
        Ok(Self { client, manager })
    }

    async fn open_pubsub(client: &Client, channels: &[String]) -> StoreResult<PubSub> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channels).await?;
        Ok(pubsub)
    }
}

impl SharedStore for RedisStore {
    async fn set_nx_ex(&self, key: &str, value: &str, seconds: u64) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, seconds: u64, value: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(seconds)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let receivers: i64 = conn.publish(channel, payload).await?;
        debug!("published on channel, receivers: {}", receivers);
        Ok(())
    }

    async fn subscribe(&self, channels: Vec<String>) -> StoreResult<Subscription> {
        // first connection is made eagerly so a bad store fails startup
        let pubsub = Self::open_pubsub(&self.client, &channels).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut pubsub = Some(pubsub);
            loop {
                let current = match pubsub.take() {
                    Some(current) => current,
                    None => match Self::open_pubsub(&client, &channels).await {
                        Ok(current) => {
                            info!("redis subscription restored for {} channels", channels.len());
                            current
                        }
                        Err(err) => {
                            error!("redis resubscribe failed: {}", err);
                            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                            continue;
                        }
                    },
                };

                let mut stream = current.into_on_message();
                while let Some(msg) = stream.next().await {
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!("skipping non-text pub/sub payload: {}", err);
                            continue;
                        }
                    };
                    let message = StoreMessage {
                        channel: msg.get_channel_name().to_owned(),
                        payload,
                    };
                    if tx.send(message).await.is_err() {
                        debug!("redis subscriber dropped");
                        return;
                    }
                }

                warn!("redis pub/sub connection closed, resubscribing");
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
            }
        });
        Ok(rx)
    }
}
