//! Retry timing policies.
//!
//! Both supervisors retry forever; these types only decide **how long** to
//! wait between attempts.
//!
//! ## Contents
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max + jitter)
//! - [`Backoff`]       per-loop attempt counter driving a policy
//! - [`JitterPolicy`]  randomization strategy to avoid reconnect storms
//!
//! ## Wiring
//! ```text
//! ConsumerOptions { rejoin: BackoffPolicy }   ──► consumer rejoin loop
//! PubSubOptions   { reconnect: BackoffPolicy } ──► pub/sub connection driver
//!                      └─► Backoff::next_delay() / Backoff::reset()
//! ```
//!
//! ## Defaults
//! - Rejoin: first=100ms, factor=2, max=10s, jitter=Equal.
//! - Reconnect: first=1s, factor=2, max=180s, jitter=None.

mod backoff;
mod jitter;

pub use backoff::{Backoff, BackoffPolicy};
pub use jitter::JitterPolicy;
