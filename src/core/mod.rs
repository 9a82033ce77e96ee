//! Runtime core: orchestration and lifecycle.
//!
//! Internal modules:
//! - [`service`]: starts both supervisors under one cancellation token and
//!   enforces the shutdown grace period;
//! - [`builder`]: assembles a [`Service`] with its subscribers;
//! - [`alive`]: tracks running components from the event stream;
//! - [`shutdown`]: cross-platform shutdown signal handling;
//! - [`config`]: orchestrator settings.

mod alive;
mod builder;
mod config;
mod service;
mod shutdown;

pub use alive::AliveTracker;
pub use builder::ServiceBuilder;
pub use config::ServiceConfig;
pub use service::{ConsumerSpec, PubSubSpec, Service};
pub use shutdown::ShutdownSignal;
