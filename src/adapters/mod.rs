//! # Client-library adapters.
//!
//! Each adapter implements one of the supervisor seams on top of a real
//! broker client and is gated behind its own cargo feature:
//!
//! | Feature | Type                     | Seam                                   |
//! |---------|--------------------------|----------------------------------------|
//! | `kafka` | [`kafka::KafkaConnector`] | [`GroupConnector`](crate::GroupConnector) |
//! | `mqtt`  | [`mqtt::MqttConnector`]   | [`Connector`](crate::Connector)           |

#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "kafka")]
pub use kafka::KafkaConnector;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttConnector;
