//! In-process event bus (spec §4.6) for standalone/dev-mode and tests,
//! where there is only one node and a production Pub/Sub fabric would be
//! pure overhead. Grounded in `gateway_directory::redis_directory`'s
//! broadcast-channel-per-subscription shape, minus the Redis transport: one
//! `tokio::sync::broadcast::Sender<BusEvent>` per [`Topic`], with
//! [`EventBus::subscribe`] bridging a fresh `broadcast::Receiver` into the
//! `mpsc::Receiver` the trait promises, via a small forwarding task.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::collaborators::{BusEvent, EventBus, Topic};
use crate::error::SwitchError;

const BROADCAST_CAPACITY: usize = 4096;
const FORWARD_CAPACITY: usize = 256;

pub struct InMemoryEventBus {
    group_msg: broadcast::Sender<BusEvent>,
    membership_change: broadcast::Sender<BusEvent>,
    read_receipt_events: broadcast::Sender<BusEvent>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self {
            group_msg: broadcast::channel(BROADCAST_CAPACITY).0,
            membership_change: broadcast::channel(BROADCAST_CAPACITY).0,
            read_receipt_events: broadcast::channel(BROADCAST_CAPACITY).0,
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<BusEvent> {
        match topic {
            Topic::GroupMsg => &self.group_msg,
            Topic::MembershipChange => &self.membership_change,
            Topic::ReadReceiptEvents => &self.read_receipt_events,
        }
    }

    /// Publishes `event` on `topic`. A topic with no current subscribers
    /// simply drops the event, same as every other bus implementation.
    pub fn publish(&self, topic: Topic, event: BusEvent) {
        let _ = self.sender(topic).send(event);
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn subscribe(&self, topic: Topic) -> Result<mpsc::Receiver<BusEvent>, SwitchError> {
        let mut broadcast_rx = self.sender(topic).subscribe();
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
                        tracing::warn!(skipped, "in-memory event bus subscriber lagged, dropping events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
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
    async fn subscriber_receives_events_published_after_subscribing() {
        let bus = InMemoryEventBus::new();
        let mut rx = bus.subscribe(Topic::GroupMsg).await.unwrap();

        bus.publish(
            Topic::GroupMsg,
            BusEvent::MembershipChange {
                group_id: gateway_core::GroupId::from("g1"),
                user_id: gateway_core::UserId::from("u1"),
                event_type: gateway_core::MembershipEventType::Join,
                timestamp: 1,
            },
        );

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, BusEvent::MembershipChange { .. }));
    }

    #[tokio::test]
    async fn topics_are_isolated_from_one_another() {
        let bus = InMemoryEventBus::new();
        let mut group_rx = bus.subscribe(Topic::GroupMsg).await.unwrap();

        bus.publish(
            Topic::MembershipChange,
            BusEvent::MembershipChange {
                group_id: gateway_core::GroupId::from("g1"),
                user_id: gateway_core::UserId::from("u1"),
                event_type: gateway_core::MembershipEventType::Leave,
                timestamp: 1,
            },
        );

        assert!(group_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn events_published_before_subscribing_are_not_delivered() {
        let bus = InMemoryEventBus::new();
        bus.publish(
            Topic::GroupMsg,
            BusEvent::MembershipChange {
                group_id: gateway_core::GroupId::from("g1"),
                user_id: gateway_core::UserId::from("u1"),
                event_type: gateway_core::MembershipEventType::Join,
                timestamp: 1,
            },
        );
        let mut rx = bus.subscribe(Topic::GroupMsg).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
