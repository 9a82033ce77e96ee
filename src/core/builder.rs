use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{alive::AliveTracker, config::ServiceConfig, service::Service};
use crate::{
    events::Bus,
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for a [`Service`].
pub struct ServiceBuilder {
    cfg: ServiceConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    token: Option<CancellationToken>,
}

impl ServiceBuilder {
    pub fn new(cfg: ServiceConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            token: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events through dedicated workers with
    /// bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Uses an externally owned cancellation token as the shutdown signal
    /// shared by both supervisors.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Builds the service. Must be called inside a tokio runtime (subscriber
    /// workers are spawned here).
    pub fn build(self) -> Service {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        let token = self.token.unwrap_or_default();

        Service::new_internal(self.cfg, bus, subs, Arc::new(AliveTracker::new()), token)
    }
}
