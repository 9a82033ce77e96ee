//! # Pub/sub supervisor: one persistent connection, re-established forever.
//!
//! ```text
//! connect(cancel, options)
//!   └─► spawn driver ─┐            └─► spawn hook task
//!   └─► wait ≤ connect_timeout for Connected (else ConnectTimedOut, keep going)
//!
//! driver:
//!   Connecting ─► Connector::connect()
//!      ├─ Err ─► ConnectFailed ─► ReconnectScheduled ─► sleep(backoff) ─► Connecting
//!      └─ Ok  ─► Connected  (epoch += 1, ConnectionEvent::Connected → hooks)
//!                  │ link.next_event(): Message → SubscriptionSet::dispatch
//!                  └ Lost ─► Disconnected (ConnectionEvent::Lost) ─► Connecting
//!   cancel / close() at any point ─► disconnect ─► Closed (terminal)
//! ```
//!
//! ## Rules
//! - Only a closed handle reaches `Closed`; connection failures never do.
//! - The first attempt after a lost connection is immediate; failed attempts
//!   back off with the reconnect policy, which resets on success.
//! - Each attempt is bounded by `connect_timeout`.
//! - Subscriptions are applied exactly once per connection epoch.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::{select, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::error::ConnectionError;
use crate::events::{Bus, Event, EventKind, PUBSUB};
use crate::policies::Backoff;
use crate::pubsub::hooks::{self, ConnectionEvent};
use crate::pubsub::state::ConnectionState;
use crate::pubsub::subscription::{MessageCallback, SubscriptionSet};
use crate::pubsub::topic::{self, QoS};
use crate::pubsub::transport::{Connector, Link, LinkEvent, PubSubOptions};

type CurrentLink = Arc<Mutex<Option<(u64, Arc<dyn Link>)>>>;

fn lock_current(current: &CurrentLink) -> MutexGuard<'_, Option<(u64, Arc<dyn Link>)>> {
    current.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts supervised pub/sub connections.
pub struct PubSubSupervisor {
    connector: Arc<dyn Connector>,
    subscriptions: SubscriptionSet,
    bus: Bus,
}

impl PubSubSupervisor {
    pub fn new(connector: Arc<dyn Connector>, bus: Bus) -> Self {
        Self {
            connector,
            subscriptions: SubscriptionSet::new(),
            bus,
        }
    }

    /// Uses a pre-populated registry; its filters are applied on every connection.
    #[must_use]
    pub fn with_subscriptions(mut self, subscriptions: SubscriptionSet) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Starts the connection driver and waits up to `options.connect_timeout`
    /// for the first connection.
    ///
    /// Never fails: when the timeout expires the handle is returned in
    /// `Connecting`/`Disconnected` state and keeps retrying in the background.
    pub async fn connect(self, cancel: &CancellationToken, options: PubSubOptions) -> PubSubHandle {
        let token = cancel.child_token();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (hooks_tx, hooks_rx) = mpsc::unbounded_channel();
        let current: CurrentLink = Arc::new(Mutex::new(None));
        let connect_timeout = options.connect_timeout;

        let hooks = tokio::spawn(hooks::run_hooks(
            hooks_rx,
            self.subscriptions.clone(),
            self.bus.clone(),
            Arc::from(options.endpoint.as_str()),
            options.reconnect,
        ));
        let driver = Driver {
            connector: self.connector,
            options,
            subscriptions: self.subscriptions.clone(),
            state: state_tx,
            hooks: hooks_tx.clone(),
            current: Arc::clone(&current),
            bus: self.bus.clone(),
        };
        let driver = tokio::spawn(driver.run(token.clone()));

        let handle = PubSubHandle {
            state: state_rx,
            subscriptions: self.subscriptions,
            current,
            token,
            driver,
            hooks,
            hook_events: hooks_tx,
            bus: self.bus,
        };

        if !handle.wait_for(ConnectionState::Connected, connect_timeout).await
            && !handle.state().is_terminal()
        {
            handle.bus.publish(
                Event::new(EventKind::ConnectTimedOut)
                    .with_component(PUBSUB)
                    .with_timeout(connect_timeout),
            );
        }
        handle
    }
}

/// Handle to a supervised connection.
pub struct PubSubHandle {
    state: watch::Receiver<ConnectionState>,
    subscriptions: SubscriptionSet,
    current: CurrentLink,
    token: CancellationToken,
    driver: JoinHandle<()>,
    hooks: JoinHandle<()>,
    hook_events: mpsc::UnboundedSender<ConnectionEvent>,
    bus: Bus,
}

impl PubSubHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until the state equals `target`; `false` on timeout or if the
    /// connection closed first.
    pub async fn wait_for(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(|s| *s == target || s.is_terminal());
        match time::timeout(timeout, reached).await {
            Ok(Ok(state)) => *state == target,
            _ => false,
        }
    }

    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    /// Registers `filter` and applies it to the current connection, if any.
    ///
    /// The subscription is reapplied after every reconnect. An error from the
    /// live connection is returned, but the filter stays registered and is
    /// retried on that connection in the background.
    pub async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), ConnectionError> {
        if self.state().is_terminal() {
            return Err(ConnectionError::Closed);
        }
        self.subscriptions
            .insert(filter, qos, callback)
            .map_err(|reason| ConnectionError::Subscribe {
                filter: filter.to_string(),
                reason,
            })?;

        let live = lock_current(&self.current).clone();
        match live {
            Some((epoch, link)) => {
                let res =
                    hooks::apply_pending(&self.subscriptions, epoch, link.as_ref(), &self.bus)
                        .await;
                if res.is_err() {
                    let _ = self.hook_events.send(ConnectionEvent::Unapplied { epoch, link });
                }
                res
            }
            None => Ok(()),
        }
    }

    /// Forgets `filter`; returns whether it was registered.
    pub async fn unsubscribe(&self, filter: &str) -> Result<bool, ConnectionError> {
        if !self.subscriptions.remove(filter) {
            return Ok(false);
        }
        let live = lock_current(&self.current).clone();
        if let Some((_, link)) = live {
            link.unsubscribe(filter).await?;
        }
        Ok(true)
    }

    /// Publishes on the current connection.
    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        payload: impl Into<Bytes>,
    ) -> Result<(), ConnectionError> {
        topic::validate_topic(topic).map_err(|reason| ConnectionError::Publish {
            topic: topic.to_string(),
            reason,
        })?;
        if self.state().is_terminal() {
            return Err(ConnectionError::Closed);
        }
        let live = lock_current(&self.current).clone();
        match live {
            Some((_, link)) => link.publish(topic, qos, payload.into()).await,
            None => Err(ConnectionError::NotConnected),
        }
    }

    /// Whether the driver has exited.
    pub fn is_finished(&self) -> bool {
        self.driver.is_finished() && self.hooks.is_finished()
    }

    /// Disconnects and waits for the `Closed` state.
    pub async fn close(self) {
        self.token.cancel();
        self.join().await;
    }

    /// Waits for the driver and hook task to exit (after cancellation).
    pub async fn join(self) {
        let _ = self.driver.await;
        let _ = self.hooks.await;
    }
}

struct Driver {
    connector: Arc<dyn Connector>,
    options: PubSubOptions,
    subscriptions: SubscriptionSet,
    state: watch::Sender<ConnectionState>,
    hooks: mpsc::UnboundedSender<ConnectionEvent>,
    current: CurrentLink,
    bus: Bus,
}

impl Driver {
    fn event(kind: EventKind) -> Event {
        Event::new(kind).with_component(PUBSUB)
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_replace(next);
    }

    fn emit_hook(&self, ev: ConnectionEvent) {
        // The hook task only exits after `Closed`.
        let _ = self.hooks.send(ev);
    }

    async fn run(self, token: CancellationToken) {
        let mut backoff = Backoff::new(self.options.reconnect);
        let mut attempt: u32 = 0;
        let mut epoch: u64 = 0;

        loop {
            if token.is_cancelled() {
                break;
            }
            attempt = attempt.saturating_add(1);
            self.set_state(ConnectionState::Connecting);
            self.bus.publish(
                Self::event(EventKind::Connecting)
                    .with_attempt(attempt)
                    .with_reason(self.options.endpoint.as_str()),
            );

            let attempt_timeout = self.options.connect_timeout;
            let res = select! {
                biased;
                _ = token.cancelled() => break,
                res = time::timeout(attempt_timeout, self.connector.connect(&self.options)) => {
                    res.unwrap_or_else(|_| Err(ConnectionError::Transport {
                        reason: format!("no connection acknowledgement within {attempt_timeout:?}"),
                    }))
                }
            };

            let link = match res {
                Ok(link) => link,
                Err(e) => {
                    self.bus.publish(
                        Self::event(EventKind::ConnectFailed)
                            .with_attempt(attempt)
                            .with_reason(e.to_string()),
                    );
                    let delay = backoff.next_delay();
                    self.bus.publish(
                        Self::event(EventKind::ReconnectScheduled)
                            .with_attempt(backoff.failures())
                            .with_delay(delay),
                    );
                    let sleep = time::sleep(delay);
                    tokio::pin!(sleep);
                    select! {
                        _ = &mut sleep => {}
                        _ = token.cancelled() => break,
                    }
                    continue;
                }
            };

            epoch += 1;
            attempt = 0;
            backoff.reset();
            *lock_current(&self.current) = Some((epoch, Arc::clone(&link)));
            self.set_state(ConnectionState::Connected);
            self.emit_hook(ConnectionEvent::Connected {
                epoch,
                link: Arc::clone(&link),
            });

            let lost = loop {
                select! {
                    biased;
                    _ = token.cancelled() => break None,
                    ev = link.next_event() => match ev {
                        LinkEvent::Message(msg) => {
                            self.subscriptions.dispatch(&msg);
                        }
                        LinkEvent::Lost(error) => break Some(error),
                    },
                }
            };
            *lock_current(&self.current) = None;

            match lost {
                Some(error) => {
                    self.set_state(ConnectionState::Disconnected);
                    self.emit_hook(ConnectionEvent::Lost { epoch, error });
                }
                None => {
                    link.disconnect().await;
                    break;
                }
            }
        }

        *lock_current(&self.current) = None;
        self.set_state(ConnectionState::Closed);
        self.emit_hook(ConnectionEvent::Closed);
    }
}
