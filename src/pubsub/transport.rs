//! # Seam between the connection supervisor and a concrete pub/sub client.
//!
//! A [`Connector`] makes one connection attempt and returns a [`Link`]. The
//! supervisor owns retries; a link is never reused after it reports
//! [`LinkEvent::Lost`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ConnectionError;
use crate::policies::BackoffPolicy;
use crate::pubsub::subscription::Message;
use crate::pubsub::topic::QoS;

/// Username/password pair sent on connect.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Connection parameters.
#[derive(Clone, Debug)]
pub struct PubSubOptions {
    /// Broker address, e.g. `tcp://host:1883`.
    pub endpoint: String,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    /// How long [`connect`](crate::PubSubSupervisor::connect) waits for the
    /// first connection before returning a still-connecting handle.
    pub connect_timeout: Duration,
    /// Delay policy between failed connection attempts.
    pub reconnect: BackoffPolicy,
    pub keep_alive: Duration,
}

impl PubSubOptions {
    pub fn new(endpoint: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            credentials: None,
            connect_timeout: Duration::from_secs(5),
            reconnect: BackoffPolicy::reconnect(Duration::from_secs(180)),
            keep_alive: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }
}

/// Splits `tcp://host:port` (or `mqtt://`, or bare `host:port`) into host
/// and port. The port defaults to 1883.
pub fn split_broker_url(url: &str) -> Result<(&str, u16), String> {
    let rest = match url.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some((scheme, _)) => return Err(format!("{url:?}: unsupported scheme {scheme:?}")),
        None => url,
    };
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("{url:?}: invalid port {port:?}"))?;
            (host, port)
        }
        None => (rest, 1883),
    };
    if host.is_empty() || host.contains('/') {
        return Err(format!("{url:?}: invalid host"));
    }
    Ok((host, port))
}

/// What an established link reports.
#[derive(Debug)]
pub enum LinkEvent {
    Message(Message),
    /// The link is unusable from now on.
    Lost(ConnectionError),
}

/// Makes connection attempts.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// One attempt; returns once the broker acknowledged the connection.
    async fn connect(&self, options: &PubSubOptions) -> Result<Arc<dyn Link>, ConnectionError>;
}

/// One established connection.
#[async_trait]
pub trait Link: Send + Sync {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), ConnectionError>;

    async fn unsubscribe(&self, filter: &str) -> Result<(), ConnectionError>;

    async fn publish(&self, topic: &str, qos: QoS, payload: Bytes) -> Result<(), ConnectionError>;

    /// Next inbound event. Only the connection driver calls this.
    async fn next_event(&self) -> LinkEvent;

    /// Closes the link politely. Best effort.
    async fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_urls() {
        assert_eq!(split_broker_url("tcp://broker:1884"), Ok(("broker", 1884)));
        assert_eq!(split_broker_url("mqtt://broker"), Ok(("broker", 1883)));
        assert_eq!(split_broker_url("10.0.0.5:1883"), Ok(("10.0.0.5", 1883)));
        assert!(split_broker_url("ws://broker:80").is_err());
        assert!(split_broker_url("tcp://:1883").is_err());
        assert!(split_broker_url("tcp://broker:x").is_err());
    }

    #[test]
    fn credentials_are_not_printed() {
        let opts = PubSubOptions::new("tcp://b:1883", "c").with_credentials("svc", "hunter2");
        assert!(!format!("{opts:?}").contains("hunter2"));
    }
}
