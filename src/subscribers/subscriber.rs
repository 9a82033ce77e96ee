//! # Event subscriber trait.
//!
//! Provides [`Subscribe`], the extension point for plugging observability
//! sinks (logs, metrics, alerting) into the runtime.
//!
//! Each subscriber gets:
//! - **Dedicated worker task** (runs independently of the supervisors)
//! - **Per-subscriber bounded queue** (capacity via [`Subscribe::queue_capacity`])
//! - **Panic isolation** (panics are reported as `EventKind::SubscriberPanicked`)
//!
//! ## Rules
//! - A slow subscriber only affects its own queue; it never stalls a claim or
//!   the connection driver.
//! - Queue overflow drops the event **for this subscriber only** and publishes
//!   `EventKind::SubscriberOverflow`.
//! - Events are processed sequentially (FIFO) per subscriber.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use brokervisor::{Event, EventKind, Subscribe};
//!
//! struct LostConnections;
//!
//! #[async_trait]
//! impl Subscribe for LostConnections {
//!     async fn on_event(&self, ev: &Event) {
//!         if matches!(ev.kind, EventKind::ConnectionLost) {
//!             // page someone, bump a counter, ...
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "lost-connections" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber for runtime observability.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Handle errors internally; do not panic.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event, called from the subscriber's own worker task.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic events.
    ///
    /// The default uses `type_name::<Self>()`, which is verbose; override it.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity (clamped to at least 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
