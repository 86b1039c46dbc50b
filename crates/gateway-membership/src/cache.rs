//! Two-tier group roster cache (spec §4.4).
//!
//! Grounded in the teacher's `LocationStore` (`Arc<DashMap<Aor, ContactUri>>`
//! with per-key `register`/`lookup`, no whole-map lock) generalized from one
//! map shape to the two-shape [`CacheEntry`] spec.md §3/§4.4 describes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use gateway_core::{GroupId, UserId};
use tokio::time::Instant;

use crate::error::MembershipError;
use crate::traits::{LocalPresence, MembershipSource};

/// A group's cached roster shape. `Small` holds the full membership;
/// `Large` holds both the full roster (so a later lookup can re-classify in
/// O(1) without re-fetching) and the locally-connected subset actually
/// served to callers — the only part whose size scales with what this node
/// terminates rather than with group size.
enum CacheEntry {
    Small {
        members: Arc<Vec<UserId>>,
        expiry: Instant,
    },
    Large {
        full_roster: Arc<Vec<UserId>>,
        local_only: Arc<Vec<UserId>>,
        expiry: Instant,
    },
}

impl CacheEntry {
    fn expiry(&self) -> Instant {
        match self {
            CacheEntry::Small { expiry, .. } => *expiry,
            CacheEntry::Large { expiry, .. } => *expiry,
        }
    }

    fn approx_bytes(&self) -> usize {
        const USER_ID_ESTIMATE: usize = 24;
        match self {
            CacheEntry::Small { members, .. } => members.len() * USER_ID_ESTIMATE,
            CacheEntry::Large { local_only, .. } => local_only.len() * USER_ID_ESTIMATE,
        }
    }
}

/// Roster membership for a group, as returned by [`MembershipCache::get_members`].
#[derive(Clone, Debug)]
pub struct Members {
    pub members: Arc<Vec<UserId>>,
    pub is_large: bool,
}

pub struct MembershipCache {
    entries: DashMap<GroupId, CacheEntry>,
    source: Arc<dyn MembershipSource>,
    presence: Arc<dyn LocalPresence>,
    ttl: Duration,
    large_group_threshold: usize,
}

impl MembershipCache {
    pub fn new(
        source: Arc<dyn MembershipSource>,
        presence: Arc<dyn LocalPresence>,
        ttl: Duration,
        large_group_threshold: usize,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            source,
            presence,
            ttl,
            large_group_threshold,
        }
    }

    /// Resolves `group_id`'s current members, fetching and classifying on a
    /// cache miss or TTL expiry. Returns the local-only subset (and
    /// `is_large = true`) for groups at or above `large_group_threshold`.
    pub async fn get_members(&self, group_id: &GroupId) -> Result<Members, MembershipError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(group_id) {
            if entry.expiry() > now {
                gateway_core::metrics::membership_cache_hit();
                return Ok(match entry.value() {
                    CacheEntry::Small { members, .. } => Members {
                        members: members.clone(),
                        is_large: false,
                    },
                    CacheEntry::Large { local_only, .. } => Members {
                        members: local_only.clone(),
                        is_large: true,
                    },
                });
            }
        }

        gateway_core::metrics::membership_cache_miss();
        let roster = self.source.fetch_roster(group_id).await?;
        let expiry = Instant::now() + self.ttl;

        if roster.len() < self.large_group_threshold {
            let members = Arc::new(roster);
            self.entries.insert(
                group_id.clone(),
                CacheEntry::Small {
                    members: members.clone(),
                    expiry,
                },
            );
            self.refresh_gauges();
            return Ok(Members {
                members,
                is_large: false,
            });
        }

        let roster_set: HashSet<&UserId> = roster.iter().collect();
        let local_only: Vec<UserId> = self
            .presence
            .locally_connected_users()
            .into_iter()
            .filter(|user_id| roster_set.contains(user_id))
            .collect();
        let full_roster = Arc::new(roster);
        let local_only = Arc::new(local_only);

        self.entries.insert(
            group_id.clone(),
            CacheEntry::Large {
                full_roster,
                local_only: local_only.clone(),
                expiry,
            },
        );
        self.refresh_gauges();
        Ok(Members {
            members: local_only,
            is_large: true,
        })
    }

    /// Drops `group_id`'s cached entry, forcing the next [`Self::get_members`]
    /// call to re-fetch from the membership source. Called when the event
    /// consumer observes a join/leave for this group, and whenever a local
    /// connection carrying a large group's membership closes.
    pub fn invalidate(&self, group_id: &GroupId) {
        self.entries.remove(group_id);
        self.refresh_gauges();
    }

    fn refresh_gauges(&self) {
        let mut large_groups = 0i64;
        let mut bytes = 0i64;
        for entry in self.entries.iter() {
            if matches!(entry.value(), CacheEntry::Large { .. }) {
                large_groups += 1;
            }
            bytes += entry.value().approx_bytes() as i64;
        }
        gateway_core::metrics::membership_cache_large_groups_set(large_groups);
        gateway_core::metrics::membership_cache_bytes_approx_set(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeSource {
        roster: Vec<UserId>,
    }

    #[async_trait]
    impl MembershipSource for FakeSource {
        async fn fetch_roster(&self, _group_id: &GroupId) -> Result<Vec<UserId>, MembershipError> {
            Ok(self.roster.clone())
        }
    }

    struct FakePresence {
        connected: StdMutex<Vec<UserId>>,
    }

    impl LocalPresence for FakePresence {
        fn is_locally_connected(&self, user_id: &UserId) -> bool {
            self.connected.lock().unwrap().contains(user_id)
        }

        fn locally_connected_users(&self) -> Vec<UserId> {
            self.connected.lock().unwrap().clone()
        }
    }

    fn user(n: u32) -> UserId {
        UserId::from(format!("user_{n}"))
    }

    #[tokio::test]
    async fn small_group_returns_full_roster() {
        let roster: Vec<UserId> = (0..10).map(user).collect();
        let source = Arc::new(FakeSource {
            roster: roster.clone(),
        });
        let presence = Arc::new(FakePresence {
            connected: StdMutex::new(vec![]),
        });
        let cache = MembershipCache::new(source, presence, Duration::from_secs(300), 1000);

        let result = cache.get_members(&GroupId::from("group_small")).await.unwrap();
        assert!(!result.is_large);
        assert_eq!(result.members.len(), 10);
    }

    #[tokio::test]
    async fn large_group_returns_only_locally_connected_subset() {
        let roster: Vec<UserId> = (0..2000).map(user).collect();
        let locally_connected = vec![user(5), user(1900)];
        let source = Arc::new(FakeSource {
            roster: roster.clone(),
        });
        let presence = Arc::new(FakePresence {
            connected: StdMutex::new(locally_connected.clone()),
        });
        let cache = MembershipCache::new(source, presence, Duration::from_secs(300), 1000);

        let result = cache.get_members(&GroupId::from("group_large")).await.unwrap();
        assert!(result.is_large);
        assert_eq!(result.members.len(), 2);
        assert!(result.members.contains(&user(5)));
        // This is the 99% memory-reduction property: cached size tracks locally
        // connected members (2), not the 2000-member roster.
        assert!(result.members.len() < roster.len() / 100);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let roster: Vec<UserId> = (0..10).map(user).collect();
        let source = Arc::new(FakeSource {
            roster: roster.clone(),
        });
        let presence = Arc::new(FakePresence {
            connected: StdMutex::new(vec![]),
        });
        let cache = MembershipCache::new(source, presence, Duration::from_secs(300), 1000);
        let group = GroupId::from("group_inv");

        cache.get_members(&group).await.unwrap();
        cache.invalidate(&group);
        let result = cache.get_members(&group).await.unwrap();
        assert_eq!(result.members.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let roster: Vec<UserId> = (0..3).map(user).collect();
        let source = Arc::new(FakeSource {
            roster: roster.clone(),
        });
        let presence = Arc::new(FakePresence {
            connected: StdMutex::new(vec![]),
        });
        let cache = MembershipCache::new(source, presence, Duration::from_millis(50), 1000);
        let group = GroupId::from("group_ttl");

        cache.get_members(&group).await.unwrap();
        tokio::time::advance(Duration::from_millis(200)).await;
        let result = cache.get_members(&group).await.unwrap();
        assert_eq!(result.members.len(), 3);
    }
}
