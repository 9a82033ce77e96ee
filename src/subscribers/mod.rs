//! # Event subscribers.
//!
//! Subscribers observe the [`Event`](crate::Event)s that the supervisors
//! publish on the [`Bus`](crate::Bus). The orchestrator listens on the bus
//! and fans events out through a [`SubscriberSet`].
//!
//! ```text
//! supervisors ── publish(Event) ──► Bus ──► Service listener ──► SubscriberSet
//!                                                                 ├──► LogWriter (tracing)
//!                                                                 └──► custom sinks
//! ```

mod embedded;
mod set;
mod subscriber;

pub use embedded::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
