//! # MQTT connection adapter (rumqttc).
//!
//! Every attempt builds a fresh `AsyncClient`/`EventLoop` pair and polls the
//! event loop until the broker answers with CONNACK. The resulting link owns
//! the event loop; the supervisor's driver polls it through
//! [`Link::next_event`], which also flushes queued subscribe and publish
//! requests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet};
use tokio::sync::Mutex;
use tokio::time;

use crate::error::ConnectionError;
use crate::pubsub::{Connector, Link, LinkEvent, Message, PubSubOptions, QoS, split_broker_url};

/// Capacity of the request channel between client and event loop.
const REQUEST_CAPACITY: usize = 64;
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);
const DISCONNECT_FLUSH: Duration = Duration::from_secs(1);

fn to_mqtt(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn from_mqtt(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn attempt_error(e: rumqttc::ConnectionError) -> ConnectionError {
    match e {
        rumqttc::ConnectionError::ConnectionRefused(code) => ConnectionError::Refused {
            reason: format!("{code:?}"),
        },
        other => ConnectionError::Transport {
            reason: other.to_string(),
        },
    }
}

/// Connects to MQTT 3.1.1 brokers over plain TCP.
#[derive(Clone, Copy, Debug, Default)]
pub struct MqttConnector;

impl MqttConnector {
    pub fn new() -> Self {
        Self
    }

    fn mqtt_options(options: &PubSubOptions) -> Result<MqttOptions, ConnectionError> {
        let (host, port) = split_broker_url(&options.endpoint)
            .map_err(|reason| ConnectionError::Refused { reason })?;
        let mut mqtt = MqttOptions::new(options.client_id.clone(), host, port);
        mqtt.set_keep_alive(options.keep_alive.max(MIN_KEEP_ALIVE))
            .set_clean_session(true);
        if let Some(creds) = &options.credentials {
            mqtt.set_credentials(creds.username.clone(), creds.password.clone());
        }
        Ok(mqtt)
    }
}

#[async_trait]
impl Connector for MqttConnector {
    async fn connect(&self, options: &PubSubOptions) -> Result<Arc<dyn Link>, ConnectionError> {
        let (client, mut eventloop) =
            AsyncClient::new(Self::mqtt_options(options)?, REQUEST_CAPACITY);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(_) => {}
                Err(e) => return Err(attempt_error(e)),
            }
        }
        Ok(Arc::new(MqttLink {
            client,
            eventloop: Mutex::new(eventloop),
        }))
    }
}

struct MqttLink {
    client: AsyncClient,
    eventloop: Mutex<EventLoop>,
}

#[async_trait]
impl Link for MqttLink {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), ConnectionError> {
        self.client
            .subscribe(filter, to_mqtt(qos))
            .await
            .map_err(|e| ConnectionError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), ConnectionError> {
        self.client
            .unsubscribe(filter)
            .await
            .map_err(|e| ConnectionError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, topic: &str, qos: QoS, payload: Bytes) -> Result<(), ConnectionError> {
        self.client
            .publish(topic, to_mqtt(qos), false, payload.to_vec())
            .await
            .map_err(|e| ConnectionError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn next_event(&self) -> LinkEvent {
        let mut eventloop = self.eventloop.lock().await;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    return LinkEvent::Message(Message {
                        topic: Arc::from(p.topic.as_str()),
                        payload: p.payload,
                        qos: from_mqtt(p.qos),
                        retain: p.retain,
                    });
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return LinkEvent::Lost(ConnectionError::Lost {
                        reason: "broker sent DISCONNECT".to_string(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    return LinkEvent::Lost(ConnectionError::Lost {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn disconnect(&self) {
        if self.client.try_disconnect().is_err() {
            return;
        }
        let mut eventloop = self.eventloop.lock().await;
        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        let _ = time::timeout(DISCONNECT_FLUSH, flush).await;
    }
}
