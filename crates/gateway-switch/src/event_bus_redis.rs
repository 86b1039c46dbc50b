//! Redis Pub/Sub-backed event bus (spec §4.6, §9: "every node sees every
//! event regardless of which node produced it"). Grounded directly in
//! `gateway_directory::redis_directory::RedisSessionDirectory`'s pattern: a
//! `WireBusEvent` JSON envelope published on a per-topic channel, mirrored
//! into every node's local `broadcast::Sender` by a spawned reconnect-loop
//! listener, one per topic so a lagging subscriber on one topic never
//! starves another.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::{ConversationId, GroupId, MembershipEventType, MsgId, UserId};
use redis::AsyncCommands;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_stream::StreamExt;

use crate::collaborators::{BusEvent, EventBus, Topic};
use crate::error::SwitchError;

const EVENT_CHANNEL_CAPACITY: usize = 4096;
const FORWARD_CAPACITY: usize = 256;

fn channel_name(topic: Topic) -> &'static str {
    match topic {
        Topic::GroupMsg => "gw:bus:group_msg",
        Topic::MembershipChange => "gw:bus:membership_change",
        Topic::ReadReceiptEvents => "gw:bus:read_receipt_events",
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
enum WireBusEvent {
    GroupMessage {
        group_id: String,
        msg_id: String,
        sender_id: String,
        content: String,
        sequence_number: u64,
        timestamp: i64,
    },
    MembershipChange {
        group_id: String,
        user_id: String,
        event_type: MembershipEventType,
        timestamp: i64,
    },
    ReadReceipt {
        msg_id: String,
        sender_id: String,
        reader_id: String,
        conversation_id: String,
        read_at: i64,
        timestamp: i64,
    },
}

impl From<BusEvent> for WireBusEvent {
    fn from(event: BusEvent) -> Self {
        match event {
            BusEvent::GroupMessage {
                group_id,
                msg_id,
                sender_id,
                content,
                sequence_number,
                timestamp,
            } => WireBusEvent::GroupMessage {
                group_id: group_id.to_string(),
                msg_id: msg_id.to_string(),
                sender_id: sender_id.to_string(),
                content,
                sequence_number,
                timestamp,
            },
            BusEvent::MembershipChange {
                group_id,
                user_id,
                event_type,
                timestamp,
            } => WireBusEvent::MembershipChange {
                group_id: group_id.to_string(),
                user_id: user_id.to_string(),
                event_type,
                timestamp,
            },
            BusEvent::ReadReceipt {
                msg_id,
                sender_id,
                reader_id,
                conversation_id,
                read_at,
                timestamp,
            } => WireBusEvent::ReadReceipt {
                msg_id: msg_id.to_string(),
                sender_id: sender_id.to_string(),
                reader_id: reader_id.to_string(),
                conversation_id: conversation_id.to_string(),
                read_at,
                timestamp,
            },
        }
    }
}

impl From<WireBusEvent> for BusEvent {
    fn from(event: WireBusEvent) -> Self {
        match event {
            WireBusEvent::GroupMessage {
                group_id,
                msg_id,
                sender_id,
                content,
                sequence_number,
                timestamp,
            } => BusEvent::GroupMessage {
                group_id: GroupId::from(group_id.as_str()),
                msg_id: MsgId::from(msg_id.as_str()),
                sender_id: UserId::from(sender_id.as_str()),
                content,
                sequence_number,
                timestamp,
            },
            WireBusEvent::MembershipChange {
                group_id,
                user_id,
                event_type,
                timestamp,
            } => BusEvent::MembershipChange {
                group_id: GroupId::from(group_id.as_str()),
                user_id: UserId::from(user_id.as_str()),
                event_type,
                timestamp,
            },
            WireBusEvent::ReadReceipt {
                msg_id,
                sender_id,
                reader_id,
                conversation_id,
                read_at,
                timestamp,
            } => BusEvent::ReadReceipt {
                msg_id: MsgId::from(msg_id.as_str()),
                sender_id: UserId::from(sender_id.as_str()),
                reader_id: UserId::from(reader_id.as_str()),
                conversation_id: ConversationId::from(conversation_id.as_str()),
                read_at,
                timestamp,
            },
        }
    }
}

pub struct RedisEventBus {
    conn: Mutex<redis::aio::ConnectionManager>,
    locals: HashMap<Topic, broadcast::Sender<BusEvent>>,
}

impl RedisEventBus {
    /// Connects with `redis::Client::open` and spawns one reconnect-loop
    /// listener per topic, each mirroring that topic's channel into a local
    /// broadcast sender [`EventBus::subscribe`] fans out from.
    pub async fn connect(redis_url: &str) -> Result<std::sync::Arc<Self>, SwitchError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| SwitchError::DirectoryLookupFailed { reason: err.to_string() })?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|err| SwitchError::DirectoryLookupFailed { reason: err.to_string() })?;

        let topics = [Topic::GroupMsg, Topic::MembershipChange, Topic::ReadReceiptEvents];
        let mut locals = HashMap::with_capacity(topics.len());
        for topic in topics {
            locals.insert(topic, broadcast::channel(EVENT_CHANNEL_CAPACITY).0);
        }

        let this = std::sync::Arc::new(Self {
            conn: Mutex::new(conn),
            locals,
        });

        for topic in topics {
            let listener_client = client.clone();
            let local_tx = this.locals.get(&topic).expect("every topic has a local sender").clone();
            tokio::spawn(async move {
                loop {
                    match listener_client.get_async_pubsub().await {
                        Ok(mut pubsub) => {
                            if let Err(err) = pubsub.subscribe(channel_name(topic)).await {
                                tracing::warn!(error = %err, ?topic, "failed to subscribe to bus channel");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                                continue;
                            }
                            let mut stream = pubsub.on_message();
                            while let Some(msg) = stream.next().await {
                                let Ok(payload) = msg.get_payload::<String>() else {
                                    continue;
                                };
                                if let Ok(wire) = serde_json::from_str::<WireBusEvent>(&payload) {
                                    let _ = local_tx.send(wire.into());
                                }
                            }
                            tracing::warn!(?topic, "bus subscription stream ended, reconnecting");
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, ?topic, "failed to open pubsub connection, retrying");
                        }
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            });
        }

        Ok(this)
    }

    /// Publishes `event` on `topic` for every node (including this one,
    /// via the same listener loop) to observe.
    pub async fn publish(&self, topic: Topic, event: BusEvent) -> Result<(), SwitchError> {
        let wire: WireBusEvent = event.into();
        let payload =
            serde_json::to_string(&wire).map_err(|err| SwitchError::DirectoryLookupFailed { reason: err.to_string() })?;
        let mut conn = self.conn.lock().await;
        conn.publish::<_, _, ()>(channel_name(topic), payload)
            .await
            .map_err(|err| SwitchError::DirectoryLookupFailed { reason: err.to_string() })?;
        Ok(())
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn subscribe(&self, topic: Topic) -> Result<mpsc::Receiver<BusEvent>, SwitchError> {
        let mut broadcast_rx = self
            .locals
            .get(&topic)
            .expect("every topic has a local sender")
            .subscribe();
        let (tx, rx) = mpsc::channel(FORWARD_CAPACITY);

        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "redis event bus subscriber lagged, dropping events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(rx)
    }
}
