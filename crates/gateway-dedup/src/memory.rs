//! In-memory dedup store: a `DashMap<String, Instant>` expiry table with a
//! lazy sweep on every call, rather than a background task — this store is
//! only ever used in tests and single-node dev mode, where a periodic sweep
//! task would outlive its usefulness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::DedupError;
use crate::traits::DedupStore;

const SWEEP_EVERY_N_CALLS: u64 = 256;

#[derive(Default)]
pub struct InMemoryDedupStore {
    entries: DashMap<String, Instant>,
    calls: AtomicU64,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep_if_due(&self) {
        let calls = self.calls.fetch_add(1, Ordering::Relaxed);
        if calls % SWEEP_EVERY_N_CALLS != 0 {
            return;
        }
        let now = Instant::now();
        self.entries.retain(|_, expiry| *expiry > now);
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn seen_then_mark(&self, msg_id: &str, ttl: Duration) -> Result<bool, DedupError> {
        self.sweep_if_due();
        let now = Instant::now();
        let new_expiry = now + ttl;

        let previous = self.entries.insert(msg_id.to_owned(), new_expiry);
        let was_seen = previous.map(|expiry| expiry > now).unwrap_or(false);

        Ok(was_seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_mark_is_not_seen_second_is() {
        let store = InMemoryDedupStore::new();
        assert!(!store.seen_then_mark("msg-1", Duration::from_secs(60)).await.unwrap());
        assert!(store.seen_then_mark("msg-1", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_treated_as_unseen() {
        let store = InMemoryDedupStore::new();
        assert!(!store.seen_then_mark("msg-2", Duration::from_millis(10)).await.unwrap());
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!store.seen_then_mark("msg-2", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn distinct_ids_are_independent() {
        let store = InMemoryDedupStore::new();
        assert!(!store.seen_then_mark("a", Duration::from_secs(60)).await.unwrap());
        assert!(!store.seen_then_mark("b", Duration::from_secs(60)).await.unwrap());
    }

    proptest::proptest! {
        /// Whatever `msg_id` a client retransmits, the first `seen_then_mark`
        /// call is always the one that marks it and the second always finds
        /// it already marked (spec §4.7's idempotent-inbound property).
        #[test]
        fn first_mark_is_unseen_second_is_seen(msg_id in "[a-zA-Z0-9_-]{1,32}") {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let store = InMemoryDedupStore::new();
                assert!(!store.seen_then_mark(&msg_id, Duration::from_secs(60)).await.unwrap());
                assert!(store.seen_then_mark(&msg_id, Duration::from_secs(60)).await.unwrap());
            });
        }
    }
}
