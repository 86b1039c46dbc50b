//! Event consumer (spec §4.6): turns the shared bus's group-message,
//! membership-change and read-receipt topics into local-only delivery.
//!
//! One task per topic, each owning its own reconnect/backoff loop — grounded
//! in the same `gateway_core::backoff` helper `gateway-directory`'s
//! `LeaseRenewer` uses, per spec.md's "ambient additions" note that both
//! share one retry concept rather than inventing a second.

use std::sync::Arc;

use gateway_core::backoff::{BackoffPolicy, RetryState};
use gateway_core::{MembershipEventType, OutboundFrame, UserId};
use gateway_membership::MembershipCache;

use crate::collaborators::{BusEvent, EventBus, Topic};
use crate::connection::mailbox::EnqueueOutcome;
use crate::connection_map::ConnectionMap;

pub struct EventConsumer {
    connections: Arc<ConnectionMap>,
    membership: Arc<MembershipCache>,
    bus: Arc<dyn EventBus>,
    push: Arc<crate::applications::push::PushService>,
    handles: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl EventConsumer {
    pub fn new(
        connections: Arc<ConnectionMap>,
        membership: Arc<MembershipCache>,
        bus: Arc<dyn EventBus>,
        push: Arc<crate::applications::push::PushService>,
    ) -> Self {
        Self {
            connections,
            membership,
            bus,
            push,
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Spawns one task per topic. Each task re-subscribes with jittered
    /// backoff if `EventBus::subscribe` fails or the stream ends.
    pub fn start(self: &Arc<Self>) {
        for topic in [Topic::GroupMsg, Topic::MembershipChange, Topic::ReadReceiptEvents] {
            let this = self.clone();
            let handle = tokio::spawn(async move { this.run_topic(topic).await });
            self.handles.lock().unwrap().push(handle);
        }
    }

    pub fn stop(&self) {
        for handle in self.handles.lock().unwrap().drain(..) {
            handle.abort();
        }
    }

    async fn run_topic(self: Arc<Self>, topic: Topic) {
        let policy = BackoffPolicy::default();
        let mut retry = RetryState::default();

        loop {
            let mut receiver = match self.bus.subscribe(topic).await {
                Ok(receiver) => receiver,
                Err(err) => {
                    tracing::warn!(?topic, error = %err, "event bus subscribe failed, retrying");
                    tokio::time::sleep(retry.next_delay(&policy)).await;
                    continue;
                }
            };
            retry.reset();

            while let Some(event) = receiver.recv().await {
                self.handle_event(event).await;
            }

            tracing::warn!(?topic, "event stream ended, resubscribing");
            tokio::time::sleep(retry.next_delay(&policy)).await;
        }
    }

    async fn handle_event(&self, event: BusEvent) {
        match event {
            BusEvent::GroupMessage {
                group_id,
                msg_id,
                sender_id,
                content,
                sequence_number,
                timestamp,
            } => {
                self.deliver_group_message(
                    &group_id,
                    &msg_id,
                    &sender_id,
                    &content,
                    sequence_number,
                    timestamp,
                )
                .await;
            }
            BusEvent::MembershipChange {
                group_id,
                user_id,
                event_type,
                timestamp,
            } => {
                self.deliver_membership_change(&group_id, &user_id, event_type, timestamp)
                    .await;
            }
            BusEvent::ReadReceipt {
                msg_id,
                sender_id,
                reader_id,
                conversation_id,
                read_at,
                timestamp,
            } => {
                let frame = OutboundFrame::ReadReceipt {
                    msg_id: msg_id.to_string(),
                    reader_id: reader_id.to_string(),
                    read_at,
                    conversation_id: conversation_id.to_string(),
                    timestamp,
                };
                // Delegate to Push service's fan-out, targeting the original
                // sender as the "recipient" (spec §4.5/§4.6).
                let _ = self.push.push_read_receipt(&sender_id, frame).await;
            }
        }
    }

    async fn deliver_group_message(
        &self,
        group_id: &gateway_core::GroupId,
        msg_id: &gateway_core::MsgId,
        sender_id: &UserId,
        content: &str,
        sequence_number: u64,
        timestamp: i64,
    ) {
        let members = match self.membership.get_members(group_id).await {
            Ok(members) => members,
            Err(err) => {
                tracing::warn!(%group_id, error = %err, "membership lookup failed for group message");
                return;
            }
        };

        for user_id in members.members.iter() {
            if user_id == sender_id {
                continue;
            }
            for handle in self.connections.devices_of(user_id) {
                let frame = OutboundFrame::Message {
                    msg_id: msg_id.to_string(),
                    sender: sender_id.to_string(),
                    content: content.to_owned(),
                    timestamp,
                    sequence_number,
                };
                if matches!(handle.try_enqueue(frame), EnqueueOutcome::Queued) {
                    gateway_core::metrics::outbound_message("message");
                }
            }
        }
    }

    async fn deliver_membership_change(
        &self,
        group_id: &gateway_core::GroupId,
        subject_user_id: &UserId,
        event_type: MembershipEventType,
        timestamp: i64,
    ) {
        self.membership.invalidate(group_id);

        let members = match self.membership.get_members(group_id).await {
            Ok(members) => members,
            Err(err) => {
                tracing::warn!(%group_id, error = %err, "membership lookup failed after invalidation");
                return;
            }
        };

        for user_id in members.members.iter() {
            if user_id == subject_user_id {
                continue;
            }
            for handle in self.connections.devices_of(user_id) {
                let frame = OutboundFrame::MembershipChange {
                    group_id: group_id.to_string(),
                    user_id: subject_user_id.to_string(),
                    event_type,
                    timestamp,
                };
                let _ = handle.try_enqueue(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mailbox::Mailbox;
    use crate::connection_map::ConnectionHandle;
    use async_trait::async_trait;
    use gateway_core::DeviceId;
    use gateway_directory::{DirectoryError, DirectoryEvent, SessionDirectory, SessionEntry};
    use gateway_membership::{InMemoryMembershipSource, MembershipSource};
    use tokio::sync::mpsc;

    struct NullDirectory;

    #[async_trait]
    impl SessionDirectory for NullDirectory {
        async fn register(&self, _: &UserId, _: &DeviceId, _: &str) -> Result<(), DirectoryError> {
            Ok(())
        }
        async fn renew(&self, _: &UserId) -> Result<(), DirectoryError> {
            Ok(())
        }
        async fn unregister(&self, _: &UserId, _: &DeviceId) -> Result<(), DirectoryError> {
            Ok(())
        }
        async fn lookup_user(&self, _: &UserId) -> Result<Vec<SessionEntry>, DirectoryError> {
            Ok(Vec::new())
        }
        fn watch_users(&self) -> tokio::sync::broadcast::Receiver<DirectoryEvent> {
            tokio::sync::broadcast::channel(1).1
        }
    }

    struct NoopBus;

    #[async_trait]
    impl EventBus for NoopBus {
        async fn subscribe(
            &self,
            _topic: Topic,
        ) -> Result<mpsc::Receiver<BusEvent>, crate::error::SwitchError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    fn device(n: u8) -> DeviceId {
        DeviceId::parse(&format!("550e8400-e29b-41d4-a716-44665544000{n}")).unwrap()
    }

    fn register_local(map: &ConnectionMap, user: &str, n: u8) -> mpsc::Receiver<OutboundFrame> {
        let user_id = UserId::from(user);
        let device_id = device(n);
        let key = gateway_core::ConnectionKey::new(&user_id, &device_id);
        let (mailbox, rx) = Mailbox::new(8);
        let handle = ConnectionHandle::new(
            key,
            user_id,
            device_id,
            mailbox,
            tokio_util::sync::CancellationToken::new(),
        );
        map.insert_or_replace(handle);
        rx
    }

    #[tokio::test]
    async fn group_message_reaches_local_members_except_sender() {
        let connections = Arc::new(ConnectionMap::new());
        let mut bob_rx = register_local(&connections, "bob", 0);
        let mut alice_rx = register_local(&connections, "alice", 0);

        let source = Arc::new(InMemoryMembershipSource::new());
        source.set_roster(
            gateway_core::GroupId::from("g1"),
            vec![UserId::from("alice"), UserId::from("bob")],
        );
        let membership_source: Arc<dyn MembershipSource> = source;
        let membership = Arc::new(MembershipCache::new(
            membership_source,
            connections.clone(),
            std::time::Duration::from_secs(300),
            1000,
        ));

        let directory: Arc<dyn SessionDirectory> = Arc::new(NullDirectory);
        let push = Arc::new(crate::applications::push::PushService::new(
            connections.clone(),
            directory,
            "node-1",
            std::time::Duration::from_secs(1),
        ));
        let bus: Arc<dyn EventBus> = Arc::new(NoopBus);
        let consumer = Arc::new(EventConsumer::new(
            connections.clone(),
            membership,
            bus,
            push,
        ));

        consumer
            .handle_event(BusEvent::GroupMessage {
                group_id: gateway_core::GroupId::from("g1"),
                msg_id: gateway_core::MsgId::from("m1"),
                sender_id: UserId::from("alice"),
                content: "hi".into(),
                sequence_number: 1,
                timestamp: 0,
            })
            .await;

        let received = bob_rx.try_recv();
        assert!(matches!(received, Ok(OutboundFrame::Message { .. })));
        assert!(alice_rx.try_recv().is_err());
    }
}
