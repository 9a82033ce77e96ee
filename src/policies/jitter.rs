//! # Jitter policy for retry delays.
//!
//! [`JitterPolicy`] randomizes backoff delays so that many consumers (or many
//! pub/sub clients) that lost the same broker do not all come back at once.
//!
//! - [`JitterPolicy::None`]: exact delay
//! - [`JitterPolicy::Full`]: random delay in `[0, delay]`
//! - [`JitterPolicy::Equal`]: `delay/2 + random[0, delay/2]`

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Policy controlling randomization of retry delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterPolicy {
    /// No jitter: use the exact backoff delay.
    ///
    /// Use when a single client retries against its own broker, or in tests.
    #[default]
    None,

    /// Full jitter: random delay in `[0, delay]`.
    ///
    /// Spreads load the most, but may retry almost immediately.
    Full,

    /// Equal jitter: `delay/2 + random[0, delay/2]`.
    ///
    /// Keeps at least half of the computed delay.
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => full_jitter(delay),
            JitterPolicy::Equal => equal_jitter(delay),
        }
    }
}

fn full_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ms))
}

fn equal_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    let half = ms / 2;
    let jitter = if half == 0 {
        0
    } else {
        rand::rng().random_range(0..=half)
    };
    Duration::from_millis(half + jitter)
}
