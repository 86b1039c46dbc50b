//! Redis-backed session directory.
//!
//! # Design summary
//! - **Why**: spec §4.3/§9 requires directory state to survive a node
//!   restart and be visible to every other node, so the production
//!   implementation cannot be the in-memory fake. Grounded in
//!   `nautilus_infrastructure::redis::{get_redis_url, create_redis_connection}`
//!   for connection setup and in `RedisCacheDatabase`'s `con: ConnectionManager`
//!   field for the direct-command style (no actor/mpsc indirection — the
//!   connection manager is cheaply `Clone` and internally serializes writes).
//! - **What**: one Redis Hash per user (`gw:dir:{user_id}`, field = device id,
//!   value = `node_id`), with `HEXPIRE`-style TTL approximated by an
//!   accompanying `PEXPIRE` on the whole hash on every register/renew. The
//!   five-device cap is enforced with `HLEN` before `HSET`. Creates/removals
//!   are additionally `PUBLISH`ed on a per-directory Pub/Sub channel so that
//!   [`RedisSessionDirectory::watch_users`] can mirror events from every node,
//!   not just the one that made the call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::{DeviceId, UserId};
use redis::AsyncCommands;
use tokio::sync::{broadcast, Mutex};

use crate::error::DirectoryError;
use crate::traits::{DirectoryEvent, SessionDirectory, SessionEntry};

const MAX_DEVICES_PER_USER: usize = 5;
const EVENT_CHANNEL_CAPACITY: usize = 4096;
const PUBSUB_CHANNEL: &str = "gw:dir:events";

fn hash_key(user_id: &UserId) -> String {
    format!("gw:dir:{user_id}")
}

#[derive(serde::Serialize, serde::Deserialize)]
struct HashValue {
    node_id: String,
    connected_at: i64,
}

#[derive(serde::Serialize, serde::Deserialize)]
enum WireEvent {
    Created {
        user_id: String,
        device_id: String,
        node_id: String,
        connected_at: i64,
    },
    Removed {
        user_id: String,
        device_id: String,
    },
}

pub struct RedisSessionDirectory {
    conn: Mutex<redis::aio::ConnectionManager>,
    ttl: Duration,
    events: broadcast::Sender<DirectoryEvent>,
}

impl RedisSessionDirectory {
    /// Connects with `redis::Client::open` and spawns the Pub/Sub listener
    /// that mirrors every node's directory writes into the local broadcast
    /// channel returned by [`SessionDirectory::watch_users`].
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Arc<Self>, DirectoryError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;

        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let this = Arc::new(Self {
            conn: Mutex::new(conn),
            ttl,
            events,
        });

        let listener_client = client;
        let events_tx = this.events.clone();
        tokio::spawn(async move {
            loop {
                match listener_client.get_async_pubsub().await {
                    Ok(mut pubsub) => {
                        if let Err(err) = pubsub.subscribe(PUBSUB_CHANNEL).await {
                            tracing::warn!(error = %err, "failed to subscribe to directory event channel");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            continue;
                        }
                        let mut stream = pubsub.on_message();
                        use tokio_stream::StreamExt;
                        while let Some(msg) = stream.next().await {
                            let Ok(payload) = msg.get_payload::<String>() else {
                                continue;
                            };
                            if let Ok(wire) = serde_json::from_str::<WireEvent>(&payload) {
                                let _ = events_tx.send(wire.into());
                            }
                        }
                        tracing::warn!("directory event subscription stream ended, reconnecting");
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to open pubsub connection, retrying");
                    }
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        Ok(this)
    }

    async fn publish(&self, event: WireEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(_) => return,
        };
        let mut conn = self.conn.lock().await;
        let _: Result<(), _> = conn.publish(PUBSUB_CHANNEL, payload).await;
    }
}

impl From<WireEvent> for DirectoryEvent {
    fn from(event: WireEvent) -> Self {
        match event {
            WireEvent::Created {
                user_id,
                device_id,
                node_id,
                connected_at,
            } => DirectoryEvent::Created(SessionEntry {
                user_id: UserId::from(user_id),
                device_id: DeviceId::parse(&device_id).unwrap_or_else(|_| DeviceId::new(device_id)),
                node_id,
                connected_at,
            }),
            WireEvent::Removed { user_id, device_id } => DirectoryEvent::Removed {
                user_id: UserId::from(user_id),
                device_id: DeviceId::parse(&device_id).unwrap_or_else(|_| DeviceId::new(device_id)),
            },
        }
    }
}

#[async_trait]
impl SessionDirectory for RedisSessionDirectory {
    async fn register(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        node_id: &str,
    ) -> Result<(), DirectoryError> {
        let key = hash_key(user_id);
        let mut conn = self.conn.lock().await;

        let already_present: bool = conn
            .hexists(&key, device_id.as_str())
            .await
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;

        if !already_present {
            let len: usize = conn
                .hlen(&key)
                .await
                .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;
            if len >= MAX_DEVICES_PER_USER {
                return Err(DirectoryError::MaxDevicesExceeded);
            }
        }

        let connected_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        let value = HashValue {
            node_id: node_id.to_owned(),
            connected_at,
        };
        let encoded = serde_json::to_string(&value)
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;

        conn.hset::<_, _, _, ()>(&key, device_id.as_str(), encoded)
            .await
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;
        conn.pexpire::<_, ()>(&key, self.ttl.as_millis() as i64)
            .await
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;
        drop(conn);

        if !already_present {
            self.publish(WireEvent::Created {
                user_id: user_id.to_string(),
                device_id: device_id.to_string(),
                node_id: node_id.to_owned(),
                connected_at,
            })
            .await;
        }
        Ok(())
    }

    async fn renew(&self, user_id: &UserId) -> Result<(), DirectoryError> {
        let key = hash_key(user_id);
        let mut conn = self.conn.lock().await;
        let exists: bool = conn
            .exists(&key)
            .await
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;
        if !exists {
            return Err(DirectoryError::NoActiveLease {
                user_id: user_id.to_string(),
            });
        }
        conn.pexpire::<_, ()>(&key, self.ttl.as_millis() as i64)
            .await
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;
        Ok(())
    }

    async fn unregister(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<(), DirectoryError> {
        let key = hash_key(user_id);
        {
            let mut conn = self.conn.lock().await;
            conn.hdel::<_, _, ()>(&key, device_id.as_str())
                .await
                .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;
        }
        self.publish(WireEvent::Removed {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
        })
        .await;
        Ok(())
    }

    async fn lookup_user(&self, user_id: &UserId) -> Result<Vec<SessionEntry>, DirectoryError> {
        let key = hash_key(user_id);
        let mut conn = self.conn.lock().await;
        let fields: std::collections::HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;

        let mut entries = Vec::with_capacity(fields.len());
        for (device_id, encoded) in fields {
            let Ok(value) = serde_json::from_str::<HashValue>(&encoded) else {
                continue;
            };
            let Ok(device_id) = DeviceId::parse(&device_id) else {
                continue;
            };
            entries.push(SessionEntry {
                user_id: user_id.clone(),
                device_id,
                node_id: value.node_id,
                connected_at: value.connected_at,
            });
        }
        Ok(entries)
    }

    fn watch_users(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.events.subscribe()
    }
}
