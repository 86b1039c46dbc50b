//! Push service (spec §4.5): fans an outbound frame out to one user's
//! devices, either a single named device or every device via the session
//! directory plus a map race-window scan.
//!
//! Grounded in spec.md §9's "narrow typed contracts behind `Arc<dyn Trait>>`"
//! lesson rather than the teacher's generic `Service<Req>` pipeline — this
//! system has one request shape per operation, so a plain struct over
//! collaborator trait objects is the right-sized analogue.

use std::sync::Arc;
use std::time::Duration;

use gateway_core::{DeviceId, OutboundFrame, UserId};
use gateway_directory::SessionDirectory;

use crate::connection::mailbox::EnqueueOutcome;
use crate::connection_map::ConnectionMap;

/// Result of a push attempt, matching spec §4.5's response contract.
#[derive(Debug)]
pub struct PushOutcome {
    pub success: bool,
    pub delivered_count: u32,
    pub failed_device_ids: Vec<String>,
    pub error: Option<String>,
}

impl PushOutcome {
    fn directory_failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            delivered_count: 0,
            failed_device_ids: Vec::new(),
            error: Some(message.into()),
        }
    }
}

pub struct PushService {
    connections: Arc<ConnectionMap>,
    directory: Arc<dyn SessionDirectory>,
    node_id: String,
    write_timeout: Duration,
}

impl PushService {
    pub fn new(
        connections: Arc<ConnectionMap>,
        directory: Arc<dyn SessionDirectory>,
        node_id: impl Into<String>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            connections,
            directory,
            node_id: node_id.into(),
            write_timeout,
        }
    }

    /// Delivers `frame` to `recipient`. If `device_id` is given, attempts
    /// only that device; otherwise fans out to every device via the
    /// directory plus a map scan for entries not yet attempted (spec §4.5).
    pub async fn push_message(
        &self,
        recipient: &UserId,
        device_id: Option<&DeviceId>,
        frame: OutboundFrame,
    ) -> PushOutcome {
        match device_id {
            Some(device_id) => self.push_single_device(recipient, device_id, frame),
            None => self.push_broadcast(recipient, frame).await,
        }
    }

    /// Read-receipts use the same fan-out routine, targeting the sender of
    /// the original message as the "recipient" (spec §4.5).
    pub async fn push_read_receipt(
        &self,
        recipient: &UserId,
        frame: OutboundFrame,
    ) -> PushOutcome {
        self.push_broadcast(recipient, frame).await
    }

    fn push_single_device(
        &self,
        recipient: &UserId,
        device_id: &DeviceId,
        frame: OutboundFrame,
    ) -> PushOutcome {
        let key = gateway_core::ConnectionKey::new(recipient, device_id);
        match self.connections.get(&key) {
            Some(handle) => match handle.try_enqueue(frame) {
                EnqueueOutcome::Queued => {
                    gateway_core::metrics::push_delivered(1);
                    PushOutcome {
                        success: true,
                        delivered_count: 1,
                        failed_device_ids: Vec::new(),
                        error: None,
                    }
                }
                EnqueueOutcome::Dropped | EnqueueOutcome::Closed => {
                    gateway_core::metrics::push_failed(1);
                    PushOutcome {
                        success: false,
                        delivered_count: 0,
                        failed_device_ids: vec![device_id.to_string()],
                        error: None,
                    }
                }
            },
            None => {
                gateway_core::metrics::push_failed(1);
                PushOutcome {
                    success: false,
                    delivered_count: 0,
                    failed_device_ids: vec![device_id.to_string()],
                    error: None,
                }
            }
        }
    }

    async fn push_broadcast(&self, recipient: &UserId, frame: OutboundFrame) -> PushOutcome {
        let entries = match tokio::time::timeout(
            self.write_timeout.max(Duration::from_secs(1)),
            self.directory.lookup_user(recipient),
        )
        .await
        {
            Ok(Ok(entries)) => entries,
            Ok(Err(err)) => {
                return PushOutcome::directory_failure(format!(
                    "failed to lookup user devices: {err}"
                ));
            }
            Err(_) => {
                return PushOutcome::directory_failure("failed to lookup user devices: timed out");
            }
        };

        let mut delivered = 0u32;
        let mut failed = Vec::new();
        let mut attempted: std::collections::HashSet<String> = std::collections::HashSet::new();

        for entry in &entries {
            attempted.insert(entry.device_id.to_string());
            if entry.node_id != self.node_id {
                failed.push(entry.device_id.to_string());
                continue;
            }
            let key = gateway_core::ConnectionKey::new(recipient, &entry.device_id);
            match self.connections.get(&key) {
                Some(handle) => match handle.try_enqueue(frame.clone()) {
                    EnqueueOutcome::Queued => delivered += 1,
                    EnqueueOutcome::Dropped | EnqueueOutcome::Closed => {
                        failed.push(entry.device_id.to_string())
                    }
                },
                None => failed.push(entry.device_id.to_string()),
            }
        }

        // Directory-map race window: a device may have registered locally
        // after the directory snapshot we just read. Scan the connection
        // map for this user's devices not yet attempted above.
        for handle in self.connections.devices_of(recipient) {
            let device_key = handle.device_id().to_string();
            if attempted.contains(&device_key) {
                continue;
            }
            match handle.try_enqueue(frame.clone()) {
                EnqueueOutcome::Queued => delivered += 1,
                EnqueueOutcome::Dropped | EnqueueOutcome::Closed => {
                    failed.push(handle.device_id().to_string())
                }
            }
        }

        if delivered > 0 {
            gateway_core::metrics::push_delivered(u64::from(delivered));
        }
        if !failed.is_empty() {
            gateway_core::metrics::push_failed(failed.len() as u64);
        }

        PushOutcome {
            success: delivered > 0,
            delivered_count: delivered,
            failed_device_ids: failed,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_directory::{DirectoryError, DirectoryEvent, SessionEntry};

    struct FakeDirectory {
        entries: Vec<SessionEntry>,
        fail: bool,
    }

    #[async_trait]
    impl SessionDirectory for FakeDirectory {
        async fn register(
            &self,
            _user_id: &UserId,
            _device_id: &DeviceId,
            _node_id: &str,
        ) -> Result<(), DirectoryError> {
            Ok(())
        }
        async fn renew(&self, _user_id: &UserId) -> Result<(), DirectoryError> {
            Ok(())
        }
        async fn unregister(
            &self,
            _user_id: &UserId,
            _device_id: &DeviceId,
        ) -> Result<(), DirectoryError> {
            Ok(())
        }
        async fn lookup_user(&self, _user_id: &UserId) -> Result<Vec<SessionEntry>, DirectoryError> {
            if self.fail {
                Err(DirectoryError::Unavailable("boom".into()))
            } else {
                Ok(self.entries.clone())
            }
        }
        fn watch_users(&self) -> tokio::sync::broadcast::Receiver<DirectoryEvent> {
            tokio::sync::broadcast::channel(1).1
        }
    }

    fn device(n: u8) -> DeviceId {
        DeviceId::parse(&format!("550e8400-e29b-41d4-a716-44665544000{n}")).unwrap()
    }

    fn register_local(map: &ConnectionMap, user: &str, n: u8) -> gateway_core::ConnectionKey {
        let user_id = UserId::from(user);
        let device_id = device(n);
        let key = gateway_core::ConnectionKey::new(&user_id, &device_id);
        let (mailbox, _rx) = crate::connection::mailbox::Mailbox::new(8);
        let handle = crate::connection_map::ConnectionHandle::new(
            key.clone(),
            user_id,
            device_id,
            mailbox,
            tokio_util::sync::CancellationToken::new(),
        );
        map.insert_or_replace(handle);
        key
    }

    #[tokio::test]
    async fn single_device_private_delivery() {
        let map = Arc::new(ConnectionMap::new());
        register_local(&map, "user_a", 0);
        let directory: Arc<dyn SessionDirectory> = Arc::new(FakeDirectory {
            entries: Vec::new(),
            fail: false,
        });
        let push = PushService::new(map, directory, "node-1", Duration::from_secs(1));

        let outcome = push
            .push_message(&UserId::from("user_a"), Some(&device(0)), OutboundFrame::Heartbeat)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.delivered_count, 1);
        assert!(outcome.failed_device_ids.is_empty());
    }

    #[tokio::test]
    async fn multi_device_broadcast_delivers_to_every_local_device() {
        let map = Arc::new(ConnectionMap::new());
        register_local(&map, "user_a", 0);
        register_local(&map, "user_a", 1);
        let entries = vec![
            SessionEntry {
                user_id: UserId::from("user_a"),
                device_id: device(0),
                node_id: "node-1".into(),
                connected_at: 0,
            },
            SessionEntry {
                user_id: UserId::from("user_a"),
                device_id: device(1),
                node_id: "node-1".into(),
                connected_at: 0,
            },
        ];
        let directory: Arc<dyn SessionDirectory> = Arc::new(FakeDirectory {
            entries,
            fail: false,
        });
        let push = PushService::new(map, directory, "node-1", Duration::from_secs(1));

        let outcome = push
            .push_message(&UserId::from("user_a"), None, OutboundFrame::Heartbeat)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.delivered_count, 2);
        assert!(outcome.failed_device_ids.is_empty());
    }

    #[tokio::test]
    async fn directory_failure_fails_the_whole_call() {
        let map = Arc::new(ConnectionMap::new());
        let directory: Arc<dyn SessionDirectory> = Arc::new(FakeDirectory {
            entries: Vec::new(),
            fail: true,
        });
        let push = PushService::new(map, directory, "node-1", Duration::from_secs(1));

        let outcome = push
            .push_message(&UserId::from("user_a"), None, OutboundFrame::Heartbeat)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.delivered_count, 0);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn remote_only_recipient_is_reported_failed() {
        let map = Arc::new(ConnectionMap::new());
        let entries = vec![SessionEntry {
            user_id: UserId::from("user_a"),
            device_id: device(0),
            node_id: "node-2".into(),
            connected_at: 0,
        }];
        let directory: Arc<dyn SessionDirectory> = Arc::new(FakeDirectory {
            entries,
            fail: false,
        });
        let push = PushService::new(map, directory, "node-1", Duration::from_secs(1));

        let outcome = push
            .push_message(&UserId::from("user_a"), None, OutboundFrame::Heartbeat)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.delivered_count, 0);
        assert_eq!(outcome.failed_device_ids, vec![device(0).to_string()]);
    }
}
