//! # Orchestrator configuration.
//!
//! [`ServiceConfig`] holds the settings of the [`Service`](crate::Service)
//! itself; consumer and pub/sub settings travel with their specs.

use std::time::Duration;

/// Runtime settings of the orchestrator.
///
/// ## Field semantics
/// - `grace`: maximum wait for both supervisors to stop after cancellation
///   (`0s` = do not wait)
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by `Bus`)
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Maximum time to wait for graceful shutdown.
    ///
    /// When shutdown is requested:
    /// - the shared `CancellationToken` is cancelled
    /// - the service waits up to `grace` for the consumer to drain and commit
    ///   and for the pub/sub connection to close
    /// - on timeout, returns `RuntimeError::GraceExceeded`
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel.
    ///
    /// Subscribers lagging more than `bus_capacity` events skip the oldest.
    pub bus_capacity: usize,
}

impl ServiceConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for ServiceConfig {
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
        }
    }
}
