//! Monotonic clock abstraction.
//!
//! # Design summary
//! - **Why**: the token bucket (spec §5) must never observe a backwards
//!   step, and tests for it need to advance time deterministically without
//!   sleeping real wall-clock seconds. A trait object lets
//!   `gateway-switch`'s rate limiter and `gateway-core`'s backoff helper
//!   share one clock concept instead of each calling `Instant::now()`
//!   directly.
//! - **What**: `SystemClock` wraps `tokio::time::Instant` (so it composes
//!   with `tokio::time::pause()` in tests); `clock.now()` is the only place
//!   that touches real time.

use std::sync::Arc;

use tokio::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Production clock: `tokio::time::Instant::now()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn system_clock_advances_monotonically_with_paused_time() {
        let clock = SystemClock;
        let t0 = clock.now();
        tokio::time::advance(std::time::Duration::from_millis(50)).await;
        let t1 = clock.now();
        assert!(t1 >= t0);
    }
}
