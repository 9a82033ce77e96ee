//! # In-memory pub/sub broker.
//!
//! [`MemoryBroker`] implements [`Connector`]. Every successful connect creates
//! a new link with a fresh connection id; links receive messages published to
//! topics matching their subscriptions.
//!
//! Fault injection: refuse connections ([`set_reachable`](MemoryBroker::set_reachable)),
//! require credentials, drop every open link
//! ([`drop_connections`](MemoryBroker::drop_connections)) and reject
//! subscribe calls on a live link
//! ([`fail_next_subscribes`](MemoryBroker::fail_next_subscribes)).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::ConnectionError;
use crate::pubsub::{self, Connector, Credentials, Link, LinkEvent, Message, PubSubOptions, QoS};

/// Shared in-memory broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    unreachable: bool,
    credentials: Option<Credentials>,
    attempts: u64,
    next_conn: u64,
    links: Vec<Arc<LinkShared>>,
    subscribe_calls: Vec<(u64, String)>,
    subscribe_failures: VecDeque<String>,
    published: Vec<(String, Bytes)>,
}

struct LinkShared {
    conn: u64,
    tx: mpsc::UnboundedSender<LinkEvent>,
    filters: Mutex<Vec<String>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuses (or accepts again) new connections.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Rejects connects that do not present these credentials.
    pub fn require_credentials(&self, username: &str, password: &str) {
        self.lock().credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
    }

    /// The next `n` subscribe calls fail with `reason`; links stay open.
    pub fn fail_next_subscribes(&self, n: usize, reason: &str) {
        self.lock()
            .subscribe_failures
            .extend(std::iter::repeat_n(reason.to_string(), n));
    }

    /// Drops every open link; each reports [`LinkEvent::Lost`].
    pub fn drop_connections(&self, reason: &str) {
        let links = std::mem::take(&mut self.lock().links);
        for link in links {
            let _ = link.tx.send(LinkEvent::Lost(ConnectionError::Lost {
                reason: reason.to_string(),
            }));
        }
    }

    /// Delivers a message to every open link subscribed to a matching filter.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let mut st = self.lock();
        st.published.push((topic.to_string(), payload.clone()));
        let mut delivered = 0;
        for link in &st.links {
            let hit = link
                .filters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .any(|f| pubsub::matches(f, topic));
            if hit && link.tx.send(LinkEvent::Message(Message::new(topic, payload.clone()))).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Connection attempts seen so far, successful or not.
    pub fn attempts(&self) -> u64 {
        self.lock().attempts
    }

    /// Successful connections so far.
    pub fn connections(&self) -> u64 {
        self.lock().next_conn
    }

    pub fn open_links(&self) -> usize {
        self.lock().links.len()
    }

    /// Every `(connection id, filter)` subscribe call, in order.
    pub fn subscribe_calls(&self) -> Vec<(u64, String)> {
        self.lock().subscribe_calls.clone()
    }

    /// Subscribe calls for `filter` on connection `conn`.
    pub fn subscribe_count(&self, conn: u64, filter: &str) -> usize {
        self.lock()
            .subscribe_calls
            .iter()
            .filter(|(c, f)| *c == conn && f == filter)
            .count()
    }

    /// Every message published through any link or [`publish`](Self::publish).
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.lock().published.clone()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, options: &PubSubOptions) -> Result<Arc<dyn Link>, ConnectionError> {
        let mut st = self.lock();
        st.attempts += 1;
        if st.unreachable {
            return Err(ConnectionError::Transport {
                reason: format!("{}: connection refused", options.endpoint),
            });
        }
        if let Some(required) = &st.credentials {
            if options.credentials.as_ref() != Some(required) {
                return Err(ConnectionError::Refused {
                    reason: "bad user name or password".into(),
                });
            }
        }

        st.next_conn += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(LinkShared {
            conn: st.next_conn,
            tx,
            filters: Mutex::new(Vec::new()),
        });
        st.links.push(Arc::clone(&shared));

        Ok(Arc::new(MemoryLink {
            broker: self.clone(),
            shared,
            rx: tokio::sync::Mutex::new(rx),
        }))
    }
}

struct MemoryLink {
    broker: MemoryBroker,
    shared: Arc<LinkShared>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<LinkEvent>>,
}

impl MemoryLink {
    fn is_open(&self) -> bool {
        self.broker
            .lock()
            .links
            .iter()
            .any(|l| Arc::ptr_eq(l, &self.shared))
    }
}

#[async_trait]
impl Link for MemoryLink {
    async fn subscribe(&self, filter: &str, _qos: QoS) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Subscribe {
                filter: filter.to_string(),
                reason: "connection is gone".into(),
            });
        }
        {
            let mut broker = self.broker.lock();
            if let Some(reason) = broker.subscribe_failures.pop_front() {
                return Err(ConnectionError::Subscribe {
                    filter: filter.to_string(),
                    reason,
                });
            }
            broker
                .subscribe_calls
                .push((self.shared.conn, filter.to_string()));
        }
        let mut filters = self.shared.filters.lock().unwrap_or_else(PoisonError::into_inner);
        if !filters.iter().any(|f| f == filter) {
            filters.push(filter.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), ConnectionError> {
        self.shared
            .filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|f| f != filter);
        Ok(())
    }

    async fn publish(&self, topic: &str, _qos: QoS, payload: Bytes) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Publish {
                topic: topic.to_string(),
                reason: "connection is gone".into(),
            });
        }
        self.broker.publish(topic, payload);
        Ok(())
    }

    async fn next_event(&self) -> LinkEvent {
        match self.rx.lock().await.recv().await {
            Some(ev) => ev,
            None => LinkEvent::Lost(ConnectionError::Lost {
                reason: "broker went away".into(),
            }),
        }
    }

    async fn disconnect(&self) {
        self.broker
            .lock()
            .links
            .retain(|l| !Arc::ptr_eq(l, &self.shared));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PubSubOptions {
        PubSubOptions::new("tcp://mem:1883", "test-client")
    }

    #[tokio::test]
    async fn delivers_to_matching_subscribers() {
        let broker = MemoryBroker::new();
        let link = broker.connect(&options()).await.unwrap();
        link.subscribe("sensors/#", QoS::AtMostOnce).await.unwrap();

        assert_eq!(broker.publish("sensors/a1/temp", "21.5"), 1);
        assert_eq!(broker.publish("other", "x"), 0);

        match link.next_event().await {
            LinkEvent::Message(msg) => assert_eq!(&*msg.topic, "sensors/a1/temp"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_links_report_lost_and_reject_calls() {
        let broker = MemoryBroker::new();
        let link = broker.connect(&options()).await.unwrap();
        broker.drop_connections("reset by peer");

        assert!(matches!(link.next_event().await, LinkEvent::Lost(_)));
        assert!(link.subscribe("a", QoS::AtMostOnce).await.is_err());
        assert_eq!(broker.open_links(), 0);
    }

    #[tokio::test]
    async fn checks_credentials() {
        let broker = MemoryBroker::new();
        broker.require_credentials("svc", "secret");

        assert!(matches!(
            broker.connect(&options()).await,
            Err(ConnectionError::Refused { .. })
        ));
        assert!(broker.connect(&options().with_credentials("svc", "secret")).await.is_ok());
        assert_eq!(broker.attempts(), 2);
        assert_eq!(broker.connections(), 1);
    }
}
