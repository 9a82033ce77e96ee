//! # Service: runs the consumer and the pub/sub connection under one token.
//!
//! The [`Service`] owns the event bus, a [`SubscriberSet`], the
//! [`AliveTracker`] and the root [`CancellationToken`].
//!
//! ## High-level architecture
//! ```text
//! Inputs to run():
//!   ConsumerSpec, Option<PubSubSpec>  ──►  Service::run()
//!
//! Preparation:
//!   listener: Bus.subscribe() ─► AliveTracker::update + SubscriberSet::emit
//!
//! Start (in order):
//!   ConsumerSupervisor::start(token)     failure → RuntimeError::Startup
//!   PubSubSupervisor::connect(token)     bounded wait, never fatal
//!
//! Shutdown path:
//!   OS signal / shutdown future / external token.cancel()
//!             └─► Bus.publish(ShutdownRequested)
//!             └─► token.cancel()   → consumer drains and commits, pub/sub closes
//!             └─► wait_all_with_grace(cfg.grace):
//!                    ├─ Ok (all joined)    → Bus.publish(AllStoppedWithin)
//!                    └─ Timeout exceeded   → Bus.publish(GraceExceeded)
//!                                            (AliveTracker.snapshot() for stuck components)
//!   listener drains the bus, subscriber queues are flushed
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use brokervisor::{
//!     BrokerEndpoints, ConsumerGroupIdentity, ConsumerSpec, HandlerFn, LogWriter, Record,
//!     Service, ServiceConfig,
//!     memory::MemoryLog,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = Service::builder(ServiceConfig::default())
//!         .with_subscribers(vec![Arc::new(LogWriter::new())])
//!         .build();
//!
//!     let log = MemoryLog::new();
//!     log.create_topic("events", 1);
//!     let consumer = ConsumerSpec::new(
//!         Arc::new(log),
//!         ConsumerGroupIdentity::new("g1", ["events"])?,
//!         BrokerEndpoints::new(["localhost:9092"])?,
//!         HandlerFn::arc(|rec: Record| async move {
//!             println!("{}@{}", rec.topic, rec.offset);
//!             Ok(())
//!         }),
//!     );
//!
//!     service.run(consumer, None).await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::{select, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use super::{alive::AliveTracker, builder::ServiceBuilder, config::ServiceConfig, shutdown};
use crate::consumer::{
    BrokerEndpoints, ConsumerGroupIdentity, ConsumerHandle, ConsumerOptions, ConsumerSupervisor,
    GroupConnector, HandlerRef,
};
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::pubsub::{Connector, PubSubHandle, PubSubOptions, PubSubSupervisor, SubscriptionSet};
use crate::subscribers::SubscriberSet;

/// Everything needed to start the consumer supervisor.
pub struct ConsumerSpec {
    pub connector: Arc<dyn GroupConnector>,
    pub identity: ConsumerGroupIdentity,
    pub endpoints: BrokerEndpoints,
    pub handler: HandlerRef,
    pub options: ConsumerOptions,
}

impl ConsumerSpec {
    pub fn new(
        connector: Arc<dyn GroupConnector>,
        identity: ConsumerGroupIdentity,
        endpoints: BrokerEndpoints,
        handler: HandlerRef,
    ) -> Self {
        Self {
            connector,
            identity,
            endpoints,
            handler,
            options: ConsumerOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ConsumerOptions) -> Self {
        self.options = options;
        self
    }
}

/// Everything needed to start the pub/sub supervisor.
pub struct PubSubSpec {
    pub connector: Arc<dyn Connector>,
    pub options: PubSubOptions,
    pub subscriptions: SubscriptionSet,
}

impl PubSubSpec {
    pub fn new(connector: Arc<dyn Connector>, options: PubSubOptions) -> Self {
        Self {
            connector,
            options,
            subscriptions: SubscriptionSet::new(),
        }
    }

    #[must_use]
    pub fn with_subscriptions(mut self, subscriptions: SubscriptionSet) -> Self {
        self.subscriptions = subscriptions;
        self
    }
}

/// Orchestrates both supervisors, event delivery and graceful shutdown.
pub struct Service {
    cfg: ServiceConfig,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    alive: Arc<AliveTracker>,
    token: CancellationToken,
}

impl Service {
    pub fn builder(cfg: ServiceConfig) -> ServiceBuilder {
        ServiceBuilder::new(cfg)
    }

    pub(super) fn new_internal(
        cfg: ServiceConfig,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        alive: Arc<AliveTracker>,
        token: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            bus,
            subs,
            alive,
            token,
        }
    }

    /// The bus every component publishes to. Hand it to handlers that
    /// report events (e.g. [`FieldLogHandler`](crate::FieldLogHandler)).
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The root token; cancelling it shuts the service down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Runs until SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere) or until the root
    /// token is cancelled.
    pub async fn run(
        self,
        consumer: ConsumerSpec,
        pubsub: Option<PubSubSpec>,
    ) -> Result<(), RuntimeError> {
        let signal = shutdown::ShutdownSignal::install().map_err(RuntimeError::Signal)?;
        self.run_until(consumer, pubsub, signal.recv()).await
    }

    /// Runs until `shutdown` completes or the root token is cancelled.
    pub async fn run_until<F>(
        self,
        consumer: ConsumerSpec,
        pubsub: Option<PubSubSpec>,
        shutdown: F,
    ) -> Result<(), RuntimeError>
    where
        F: Future<Output = ()>,
    {
        let listener_stop = CancellationToken::new();
        let listener = self.subscriber_listener(listener_stop.clone());

        let result = self.supervise(consumer, pubsub, shutdown).await;

        listener_stop.cancel();
        let _ = listener.await;
        if let Ok(set) = Arc::try_unwrap(self.subs) {
            set.shutdown().await;
        }
        result
    }

    async fn supervise<F>(
        &self,
        consumer: ConsumerSpec,
        pubsub: Option<PubSubSpec>,
        shutdown: F,
    ) -> Result<(), RuntimeError>
    where
        F: Future<Output = ()>,
    {
        let consumer = ConsumerSupervisor::new(consumer.connector, self.bus.clone())
            .with_options(consumer.options)
            .start(
                self.token.clone(),
                consumer.identity,
                consumer.endpoints,
                consumer.handler,
            )
            .await
            .inspect_err(|_| self.token.cancel())?;

        let pubsub = match pubsub {
            Some(spec) => Some(
                PubSubSupervisor::new(spec.connector, self.bus.clone())
                    .with_subscriptions(spec.subscriptions)
                    .connect(&self.token, spec.options)
                    .await,
            ),
            None => None,
        };

        select! {
            _ = shutdown => {}
            _ = self.token.cancelled() => {}
        }
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.token.cancel();
        self.wait_all_with_grace(consumer, pubsub).await
    }

    /// Forwards bus events to the alive tracker and the subscriber set.
    ///
    /// On `stop`, drains whatever is still buffered on the bus and exits.
    fn subscriber_listener(&self, stop: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        let alive = Arc::clone(&self.alive);

        tokio::spawn(async move {
            loop {
                select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => {
                            alive.update(&ev).await;
                            set.emit(&ev);
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => {
                        loop {
                            match rx.try_recv() {
                                Ok(ev) => {
                                    alive.update(&ev).await;
                                    set.emit(&ev);
                                }
                                Err(TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
        })
    }

    /// Waits for both supervisors within the configured grace period.
    async fn wait_all_with_grace(
        &self,
        consumer: ConsumerHandle,
        pubsub: Option<PubSubHandle>,
    ) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let done = async {
            consumer.join().await;
            if let Some(pubsub) = pubsub {
                pubsub.join().await;
            }
        };

        match time::timeout(grace, done).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let stuck = self.alive.snapshot().await;
                self.bus
                    .publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")));
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}
