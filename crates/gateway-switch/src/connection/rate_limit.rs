//! Per-connection token bucket (spec §5: capacity = refill rate =
//! `max_messages_per_second`, default 100).
//!
//! Uses `parking_lot::Mutex` rather than a `DashMap` shard since this state
//! is single-connection, single-writer — exactly the case spec.md §4.8/§5
//! calls out for a lock smaller than a whole concurrent map.

use parking_lot::Mutex;
use tokio::time::Instant;

use gateway_core::time::SharedClock;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    clock: SharedClock,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(max_messages_per_second: u32, clock: SharedClock) -> Self {
        let capacity = max_messages_per_second as f64;
        Self {
            capacity,
            refill_per_sec: capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: clock.now(),
            }),
            clock,
        }
    }

    /// Attempts to consume one token. Returns `true` if the frame may
    /// proceed, `false` if the bucket is exhausted (spec: emit
    /// `error{RATE_LIMIT_EXCEEDED}` and drop the frame).
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
