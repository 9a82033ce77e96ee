//! # Connection hooks.
//!
//! The driver never runs user-visible work inline: it pushes a
//! [`ConnectionEvent`] and keeps reading. A dedicated hook task consumes the
//! stream, reapplies subscriptions after every (re)connect and reports
//! transitions on the bus.
//!
//! ```text
//! driver ── Connected{epoch, link} ──► hook task ── pending_for(epoch) ──► link.subscribe()
//! handle ── Unapplied{epoch, link} ──►           ── retry after reconnect backoff
//!        ── Lost{epoch, error}     ──►           ── ConnectionLost, stop retrying
//!        ── Closed                 ──►           ── ConnectionClosed, exit
//! ```
//!
//! A filter whose `subscribe` failed is retried on the same connection with
//! the reconnect backoff until it is applied or the connection goes away.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::error::ConnectionError;
use crate::events::{Bus, Event, EventKind, PUBSUB};
use crate::policies::{Backoff, BackoffPolicy};
use crate::pubsub::subscription::SubscriptionSet;
use crate::pubsub::transport::Link;

/// Connection transitions emitted by the driver.
pub enum ConnectionEvent {
    Connected { epoch: u64, link: Arc<dyn Link> },
    /// A subscription could not be applied to the live connection `epoch`.
    Unapplied { epoch: u64, link: Arc<dyn Link> },
    Lost { epoch: u64, error: ConnectionError },
    Closed,
}

/// Applies every not-yet-applied subscription to `link`.
pub(crate) async fn apply_pending(
    subs: &SubscriptionSet,
    epoch: u64,
    link: &dyn Link,
    bus: &Bus,
) -> Result<(), ConnectionError> {
    let mut first_err = None;
    for (filter, qos) in subs.pending_for(epoch) {
        match link.subscribe(&filter, qos).await {
            Ok(()) => bus.publish(
                Event::new(EventKind::Resubscribed)
                    .with_component(PUBSUB)
                    .with_session(epoch)
                    .with_topic(filter),
            ),
            Err(e) => {
                subs.release(&filter, epoch);
                bus.publish(
                    Event::new(EventKind::SubscribeFailed)
                        .with_component(PUBSUB)
                        .with_session(epoch)
                        .with_topic(filter.as_str())
                        .with_reason(e.to_string()),
                );
                first_err.get_or_insert(e);
            }
        }
    }
    first_err.map_or(Ok(()), Err)
}

/// Retry of subscriptions left unapplied on connection `epoch`.
struct Retry {
    epoch: u64,
    link: Arc<dyn Link>,
    backoff: Backoff,
    at: Instant,
}

impl Retry {
    fn new(epoch: u64, link: Arc<dyn Link>, policy: BackoffPolicy) -> Self {
        let mut backoff = Backoff::new(policy);
        let at = Instant::now() + backoff.next_delay();
        Self {
            epoch,
            link,
            backoff,
            at,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn run_hooks(
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    subs: SubscriptionSet,
    bus: Bus,
    endpoint: Arc<str>,
    retry_policy: BackoffPolicy,
) {
    let mut live_epoch = 0u64;
    let mut retry: Option<Retry> = None;
    loop {
        let deadline = retry.as_ref().map(|r| r.at);
        let ev = tokio::select! {
            ev = events.recv() => ev,
            () = sleep_until(deadline) => {
                if let Some(mut r) = retry.take() {
                    if apply_pending(&subs, r.epoch, r.link.as_ref(), &bus).await.is_err() {
                        r.at = Instant::now() + r.backoff.next_delay();
                        retry = Some(r);
                    }
                }
                continue;
            }
        };
        let Some(ev) = ev else { break };
        match ev {
            ConnectionEvent::Connected { epoch, link } => {
                live_epoch = epoch;
                retry = None;
                bus.publish(
                    Event::new(EventKind::Connected)
                        .with_component(PUBSUB)
                        .with_session(epoch)
                        .with_reason(Arc::clone(&endpoint)),
                );
                if apply_pending(&subs, epoch, link.as_ref(), &bus).await.is_err() {
                    retry = Some(Retry::new(epoch, link, retry_policy));
                }
            }
            ConnectionEvent::Unapplied { epoch, link } => {
                if epoch == live_epoch && retry.is_none() {
                    retry = Some(Retry::new(epoch, link, retry_policy));
                }
            }
            ConnectionEvent::Lost { epoch, error } => {
                live_epoch = 0;
                retry = None;
                bus.publish(
                    Event::new(EventKind::ConnectionLost)
                        .with_component(PUBSUB)
                        .with_session(epoch)
                        .with_reason(error.to_string()),
                );
            }
            ConnectionEvent::Closed => {
                bus.publish(Event::new(EventKind::ConnectionClosed).with_component(PUBSUB));
                break;
            }
        }
    }
}
