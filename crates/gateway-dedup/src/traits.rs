use async_trait::async_trait;
use std::time::Duration;

use crate::error::DedupError;

/// Atomic set-if-absent-with-TTL, used once on the inbound send path to
/// collapse a client's retransmitted `send_msg` into a single downstream
/// routing call (spec §4.7, testable property "Idempotent inbound").
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Returns `true` if `msg_id` was already present (a duplicate); `false`
    /// if this call is the one that marked it seen. Either way, `msg_id` is
    /// now present with `ttl` remaining.
    async fn seen_then_mark(&self, msg_id: &str, ttl: Duration) -> Result<bool, DedupError>;
}
