//! A mutable in-memory [`MembershipSource`], for tests and single-node dev
//! wiring that has no real user-service to call.

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_core::{GroupId, UserId};

use crate::error::MembershipError;
use crate::traits::MembershipSource;

#[derive(Default)]
pub struct InMemoryMembershipSource {
    rosters: DashMap<GroupId, Vec<UserId>>,
}

impl InMemoryMembershipSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces `group_id`'s roster. Callers that also run a
    /// [`crate::cache::MembershipCache`] against this source must call its
    /// `invalidate` afterwards; this fake does not invalidate on their behalf.
    pub fn set_roster(&self, group_id: GroupId, members: Vec<UserId>) {
        self.rosters.insert(group_id, members);
    }
}

#[async_trait]
impl MembershipSource for InMemoryMembershipSource {
    async fn fetch_roster(&self, group_id: &GroupId) -> Result<Vec<UserId>, MembershipError> {
        Ok(self
            .rosters
            .get(group_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_empty_roster_for_unknown_group() {
        let source = InMemoryMembershipSource::new();
        let roster = source.fetch_roster(&GroupId::from("ghost")).await.unwrap();
        assert!(roster.is_empty());
    }

    #[tokio::test]
    async fn set_roster_then_fetch_roundtrips() {
        let source = InMemoryMembershipSource::new();
        let group = GroupId::from("group_a");
        source.set_roster(group.clone(), vec![UserId::from("u1"), UserId::from("u2")]);
        let roster = source.fetch_roster(&group).await.unwrap();
        assert_eq!(roster.len(), 2);
    }
}
