//! In-memory backends for both supervisors.
//!
//! Used by the test suite and by applications that want to run the
//! supervisors without external brokers.

mod broker;
mod log;

pub use broker::MemoryBroker;
pub use log::MemoryLog;
