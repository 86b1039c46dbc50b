//! Collaborator contracts the membership cache depends on.

use async_trait::async_trait;
use gateway_core::{GroupId, UserId};

use crate::error::MembershipError;

/// The external source of group-membership truth (spec's "user-service").
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Fetches the full, authoritative roster for `group_id`.
    async fn fetch_roster(&self, group_id: &GroupId) -> Result<Vec<UserId>, MembershipError>;
}

/// A read-only view of which users have a locally-terminated connection on
/// this node. Kept narrow and connection-map-agnostic so `gateway-membership`
/// has no dependency edge on `gateway-switch`.
pub trait LocalPresence: Send + Sync {
    /// Whether `user_id` currently has at least one `ACTIVE` connection on
    /// this node.
    fn is_locally_connected(&self, user_id: &UserId) -> bool;

    /// Every user id with at least one locally-terminated `ACTIVE`
    /// connection, for the large-group local-only derivation in
    /// [`crate::cache::MembershipCache::get_members`].
    fn locally_connected_users(&self) -> Vec<UserId>;
}
