//! # Backoff policy for rejoin and reconnect loops.
//!
//! [`BackoffPolicy`] controls how retry delays grow while a broker stays
//! unreachable. It is parameterized by:
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::max`] the cap (the "max reconnect interval").
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`, then
//! jitter is applied. The base delay is derived from the attempt number only,
//! so jitter output never feeds back into later delays.
//!
//! [`Backoff`] is the small piece of loop state that counts consecutive
//! failures and is reset once a session or connection is established.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use brokervisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(180),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_secs(1));
//! assert_eq!(backoff.next(1), Duration::from_secs(2));
//! assert_eq!(backoff.next(10), Duration::from_secs(180));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Maximum delay between two attempts.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter applied to every computed delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Same as [`BackoffPolicy::rejoin`].
    fn default() -> Self {
        Self::rejoin()
    }
}

impl BackoffPolicy {
    /// Policy used between consumer-group rejoin attempts:
    /// 100ms doubling up to 10s, equal jitter.
    pub fn rejoin() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }

    /// Policy used between pub/sub reconnect attempts:
    /// 1s doubling up to `max`, no jitter.
    pub fn reconnect(max: Duration) -> Self {
        Self {
            first: Duration::from_secs(1).min(max),
            max,
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay for the given attempt number (0-indexed).
    ///
    /// Non-finite or negative intermediate values (huge attempts, odd factors)
    /// clamp to [`BackoffPolicy::max`].
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let unclamped = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !unclamped.is_finite() || unclamped < 0.0 || unclamped > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped)
        };
        self.jitter.apply(base)
    }
}

/// Consecutive-failure counter bound to a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Returns the delay for the current failure and advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.next(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.attempt
    }

    /// Forgets previous failures; the next delay is `first` again.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_exponential_growth_no_jitter() {
        let policy = exact(100, 30_000, 2.0);
        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(2), Duration::from_millis(400));
        assert_eq!(policy.next(3), Duration::from_millis(800));
    }

    #[test]
    fn test_clamped_to_max() {
        let policy = exact(100, 1_000, 2.0);
        assert_eq!(policy.next(10), Duration::from_secs(1));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_first_exceeds_max() {
        let policy = exact(10_000, 5_000, 2.0);
        assert_eq!(policy.next(0), Duration::from_secs(5));
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..exact(1_000, 30_000, 1.0)
        };
        for attempt in 0..50 {
            let delay = policy.next(attempt);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn test_full_jitter_never_exceeds_cap() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Full,
            ..exact(100, 3_000, 2.0)
        };
        for attempt in 0..20 {
            assert!(policy.next(attempt) <= Duration::from_secs(3));
        }
    }

    #[test]
    fn test_reconnect_policy_caps_first_delay() {
        let policy = BackoffPolicy::reconnect(Duration::from_millis(300));
        assert_eq!(policy.next(0), Duration::from_millis(300));
    }

    #[test]
    fn test_backoff_counter_resets() {
        let mut backoff = Backoff::new(exact(10, 1_000, 2.0));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.failures(), 2);

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }
}
