//! The connection map: concurrent `ConnectionKey -> ConnectionHandle` table
//! (spec §3/§5's central shared structure). Grounded in
//! `spark_switch::core::session_manager::SessionManager` — same
//! `DashMap`-backed repository shape — generalized here for multiple
//! concurrent readers (Push service, Event consumer, metrics) alongside the
//! single-writer Connection lifecycle spec.md §5 requires.

use std::sync::Arc;

use dashmap::DashMap;
use gateway_core::{ConnectionKey, DeviceId, UserId};
use tokio_util::sync::CancellationToken;

use crate::connection::mailbox::{EnqueueOutcome, Mailbox};

struct ConnectionHandleInner {
    key: ConnectionKey,
    user_id: UserId,
    device_id: DeviceId,
    mailbox: Mailbox,
    cancellation: CancellationToken,
}

/// A cheap, `Clone`-able reference to one live connection's externally
/// visible surface: its key, identity and mailbox, plus the cancellation
/// token used to request its close. Holding a handle never blocks a
/// `DashMap` shard — the handle is a plain `Arc` clone.
#[derive(Clone)]
pub struct ConnectionHandle(Arc<ConnectionHandleInner>);

impl ConnectionHandle {
    pub fn new(
        key: ConnectionKey,
        user_id: UserId,
        device_id: DeviceId,
        mailbox: Mailbox,
        cancellation: CancellationToken,
    ) -> Self {
        Self(Arc::new(ConnectionHandleInner {
            key,
            user_id,
            device_id,
            mailbox,
            cancellation,
        }))
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.0.key
    }

    pub fn user_id(&self) -> &UserId {
        &self.0.user_id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.0.device_id
    }

    /// Attempts to enqueue `frame` into this connection's mailbox (spec
    /// §4.5's single-device delivery primitive). Never blocks.
    pub fn try_enqueue(&self, frame: gateway_core::OutboundFrame) -> EnqueueOutcome {
        self.0.mailbox.try_enqueue(frame)
    }

    /// Requests this connection's writer/reader/heartbeat tasks to cancel.
    /// Idempotent: a connection already closing ignores a second call.
    pub fn request_close(&self) {
        self.0.cancellation.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.0.cancellation.is_cancelled() || self.0.mailbox.is_closed()
    }
}

/// Concurrent repository of live connections, keyed by `user_id + "_" +
/// device_id`.
///
/// # Design summary
/// - **Why**: Push service, the Event consumer and `/metrics` all need
///   concurrent read access while the Connection lifecycle concurrently
///   inserts/removes; a single `DashMap` gives atomic insert-or-replace,
///   atomic delete-with-prior-check, and lock-free snapshot iteration
///   without a whole-map lock (spec §5's shared-resource policy), the same
///   trade the teacher's `SessionManager` makes for `CallSession`s.
#[derive(Default)]
pub struct ConnectionMap {
    connections: DashMap<ConnectionKey, ConnectionHandle>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `handle`, replacing and returning any prior connection
    /// registered under the same key (spec §4.2 REGISTERING: "if a prior
    /// Connection exists for the same key, close it first — newest session
    /// wins"). The caller is responsible for calling
    /// [`ConnectionHandle::request_close`] on the returned handle.
    pub fn insert_or_replace(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.connections.insert(handle.key().clone(), handle)
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<ConnectionHandle> {
        self.connections.get(key).map(|entry| entry.value().clone())
    }

    /// Removes the entry for `key`, but only if it still points at `handle`
    /// — guards against a closing Connection racing a newer registration
    /// under the same key and evicting the newer one.
    pub fn remove_if_current(&self, key: &ConnectionKey, handle: &ConnectionHandle) {
        self.connections.remove_if(key, |_, existing| {
            Arc::ptr_eq(&existing.0, &handle.0)
        });
    }

    /// Every connection whose key is prefixed by `user_id`'s prefix (spec
    /// §4.5's directory-map race-window scan and §4.6's group fan-out).
    pub fn devices_of(&self, user_id: &UserId) -> Vec<ConnectionHandle> {
        let prefix = ConnectionKey::user_prefix(user_id);
        self.connections
            .iter()
            .filter(|entry| entry.key().as_str().starts_with(&prefix))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// A lock-free snapshot of every live connection, for broadcast-style
    /// fan-out (spec §4.6 group message / membership change).
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl gateway_membership::LocalPresence for ConnectionMap {
    fn is_locally_connected(&self, user_id: &UserId) -> bool {
        let prefix = ConnectionKey::user_prefix(user_id);
        self.connections
            .iter()
            .any(|entry| entry.key().as_str().starts_with(&prefix))
    }

    fn locally_connected_users(&self) -> Vec<UserId> {
        let mut seen = std::collections::HashSet::new();
        let mut users = Vec::new();
        for entry in self.connections.iter() {
            let user_id = entry.value().user_id().clone();
            if seen.insert(user_id.clone()) {
                users.push(user_id);
            }
        }
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::DeviceId;

    fn device(n: u8) -> DeviceId {
        DeviceId::parse(&format!("550e8400-e29b-41d4-a716-44665544000{n}")).unwrap()
    }

    fn handle(user: &str, n: u8) -> ConnectionHandle {
        let user_id = UserId::from(user);
        let device_id = device(n);
        let key = ConnectionKey::new(&user_id, &device_id);
        let (mailbox, _rx) = Mailbox::new(8);
        ConnectionHandle::new(key, user_id, device_id, mailbox, CancellationToken::new())
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let map = ConnectionMap::new();
        let h = handle("user_a", 0);
        let key = h.key().clone();
        assert!(map.insert_or_replace(h).is_none());
        assert!(map.get(&key).is_some());
    }

    #[test]
    fn inserting_same_key_returns_previous_handle() {
        let map = ConnectionMap::new();
        let first = handle("user_a", 0);
        let key = first.key().clone();
        map.insert_or_replace(first.clone());
        let second = handle("user_a", 0);
        let replaced = map.insert_or_replace(second);
        assert!(replaced.is_some());
        assert!(Arc::ptr_eq(&replaced.unwrap().0, &first.0));
        assert_eq!(map.len(), 1);
        let _ = key;
    }

    #[test]
    fn devices_of_scans_by_user_prefix() {
        let map = ConnectionMap::new();
        map.insert_or_replace(handle("user_a", 0));
        map.insert_or_replace(handle("user_a", 1));
        map.insert_or_replace(handle("user_b", 0));

        let devices = map.devices_of(&UserId::from("user_a"));
        assert_eq!(devices.len(), 2);
    }

    #[test]
    fn remove_if_current_ignores_stale_handle() {
        let map = ConnectionMap::new();
        let stale = handle("user_a", 0);
        let key = stale.key().clone();
        map.insert_or_replace(stale.clone());
        let fresh = handle("user_a", 0);
        map.insert_or_replace(fresh.clone());

        // A stale close racing a fresh registration must not evict the fresh one.
        map.remove_if_current(&key, &stale);
        assert!(map.get(&key).is_some());
    }

    #[test]
    fn local_presence_reports_connected_users() {
        let map = ConnectionMap::new();
        map.insert_or_replace(handle("user_a", 0));
        use gateway_membership::LocalPresence;
        assert!(map.is_locally_connected(&UserId::from("user_a")));
        assert!(!map.is_locally_connected(&UserId::from("user_c")));
        assert_eq!(map.locally_connected_users().len(), 1);
    }
}
