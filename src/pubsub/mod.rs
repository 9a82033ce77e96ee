//! # Persistent pub/sub connection supervision.
//!
//! - [`PubSubSupervisor`] keeps one connection to a broker alive and exposes
//!   its state through a [`PubSubHandle`].
//! - [`SubscriptionSet`] holds the filters to reapply after every reconnect.
//! - [`Connector`] / [`Link`] abstract the client library.

mod hooks;
mod state;
mod subscription;
mod supervisor;
mod topic;
mod transport;

pub use hooks::ConnectionEvent;
pub use state::ConnectionState;
pub use subscription::{Message, MessageCallback, SubscriptionSet};
pub use supervisor::{PubSubHandle, PubSubSupervisor};
pub use topic::{QoS, matches, validate_filter, validate_topic};
pub use transport::{Connector, Credentials, Link, LinkEvent, PubSubOptions, split_broker_url};
