//! Exponential backoff with jitter, shared by lease renewal and event-bus
//! reconnect loops.
//!
//! # Design summary
//! - **Why**: spec §4.3 requires `renew` failures to retry with
//!   exponential-backoff-and-jitter, and §4.6 requires the same for event-bus
//!   reconnects. One helper avoids two subtly different reimplementations.
//! - **What**: grounded in the retry shape `nautechsystems-nautilus_trader`'s
//!   Redis connection manager documents — `rand(0 .. factor * (base ^ try))`
//!   — capped at `max_delay`.

use std::time::Duration;

use rand::Rng;

#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the `attempt`th retry (0-indexed), with full jitter in
    /// `[0, computed_delay]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Clamp in `f64` space before building a `Duration`: `base * multiplier
        // ^ attempt` overflows `f64` (and `Duration::mul_f64` panics on an
        // overflowing or infinite product) long before `attempt` stops
        // growing, which it doesn't on a sustained outage (spec §4.3/§4.6
        // retry indefinitely).
        let factor = self.multiplier.powi(attempt as i32);
        let computed_secs = (self.base_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        let computed = Duration::from_secs_f64(computed_secs.max(0.0));
        let jitter_ms = rand::thread_rng().gen_range(0..=computed.as_millis().max(1) as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// A small retry-attempt counter, reset on success.
#[derive(Debug, Default)]
pub struct RetryState {
    attempt: u32,
}

impl RetryState {
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn next_delay(&mut self, policy: &BackoffPolicy) -> Duration {
        let delay = policy.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        };
        // attempt 10 would be enormous uncapped; must stay bounded by max_delay.
        let delay = policy.delay_for(10);
        assert!(delay <= Duration::from_millis(500));
    }

    #[test]
    fn retry_state_resets() {
        let policy = BackoffPolicy::default();
        let mut state = RetryState::default();
        let _ = state.next_delay(&policy);
        let _ = state.next_delay(&policy);
        assert_eq!(state.attempt, 2);
        state.reset();
        assert_eq!(state.attempt, 0);
    }

    proptest::proptest! {
        /// Whatever `base_delay`/`multiplier`/`attempt` a caller picks, the
        /// jittered delay never exceeds `max_delay` — lease renewal and
        /// event-bus reconnect loops depend on this to bound their own retry
        /// pacing.
        #[test]
        fn delay_never_exceeds_max_delay(
            base_ms in 1u64..5000,
            max_ms in 1u64..60_000,
            multiplier in 1.0f64..4.0,
            attempt in 0u32..40,
        ) {
            let policy = BackoffPolicy {
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                multiplier,
            };
            assert!(policy.delay_for(attempt) <= policy.max_delay);
        }
    }
}
