//! The session directory's narrow capability surface (spec §4.3, §9's
//! "no collaborator leaks its transport types into the core" rule).

use async_trait::async_trait;
use gateway_core::{DeviceId, UserId};

/// One `(user, device) -> node` directory entry (spec §3).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionEntry {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub node_id: String,
    pub connected_at: i64,
}

/// A create/delete event streamed by [`SessionDirectory::watch_users`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DirectoryEvent {
    Created(SessionEntry),
    Removed { user_id: UserId, device_id: DeviceId },
}

/// Session directory client contract (spec §4.3).
///
/// Implementations: [`crate::memory::InMemorySessionDirectory`] (test fake,
/// also suitable for a single-node deployment) and
/// [`crate::redis_directory::RedisSessionDirectory`] (production, Redis-backed).
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Registers `device_id` under `user_id`'s lease on `node_id`.
    ///
    /// Idempotent for an already-registered `(user_id, device_id)` pair.
    /// Returns [`crate::error::DirectoryError::MaxDevicesExceeded`] when the
    /// user already has 5 distinct devices and this one is novel.
    async fn register(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        node_id: &str,
    ) -> Result<(), crate::error::DirectoryError>;

    /// Extends the user's lease TTL without altering its entries.
    async fn renew(&self, user_id: &UserId) -> Result<(), crate::error::DirectoryError>;

    /// Removes one device's entry from the user's lease.
    async fn unregister(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<(), crate::error::DirectoryError>;

    /// Every device currently registered for `user_id`, across the cluster.
    async fn lookup_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionEntry>, crate::error::DirectoryError>;

    /// Subscribes to create/delete events over the user prefix. Every
    /// subscriber sees every event (broadcast, not work-queue) semantics.
    fn watch_users(&self) -> tokio::sync::broadcast::Receiver<DirectoryEvent>;
}
