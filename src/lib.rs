//! # brokervisor
//!
//! **Brokervisor** keeps two long-lived broker clients healthy inside one
//! process:
//!
//! - a **consumer-group member** on a partitioned log (Kafka), which joins the
//!   group, processes records per partition and acknowledges offsets only
//!   after the handler succeeded, rejoining after every rebalance or failure;
//! - a **persistent pub/sub connection** (MQTT), which reconnects with capped
//!   exponential backoff and reapplies its subscriptions after every
//!   reconnect.
//!
//! Both run under one [`CancellationToken`](tokio_util::sync::CancellationToken)
//! owned by the [`Service`], which shuts them down within a grace period.
//!
//! ## Architecture
//! ```text
//!          ┌───────────────────────────────────────────────────────────────┐
//!          │ Service (orchestrator)                                        │
//!          │  - root CancellationToken                                     │
//!          │  - Bus (broadcast events) ─► AliveTracker + SubscriberSet     │
//!          └──────┬─────────────────────────────────────────┬──────────────┘
//!                 ▼                                         ▼
//!   ┌───────────────────────────┐             ┌───────────────────────────┐
//!   │ ConsumerSupervisor        │             │ PubSubSupervisor          │
//!   │  rejoin loop (backoff)    │             │  driver (reconnect loop)  │
//!   │   └► Session              │             │   └► Link (one epoch)     │
//!   │       └► Claim per        │             │  hook task                │
//!   │          partition        │             │   └► resubscribe/log      │
//!   │          └► RecordHandler │             │  watch<ConnectionState>   │
//!   └─────────────┬─────────────┘             └─────────────┬─────────────┘
//!                 │ GroupConnector                          │ Connector
//!                 ▼                                         ▼
//!      MemoryLog | KafkaConnector                 MemoryBroker | MqttConnector
//!                                  Bus ─► LogWriter ─► tracing
//! ```
//!
//! ## Guarantees
//! - Records of one partition are handled sequentially in offset order; an
//!   offset is marked only after the handler returned `Ok`.
//! - A handler failure withholds the offset and ends the session; the record
//!   is delivered again by the next session (at-least-once).
//! - Only failures to start the consumer are fatal. Sessions and connections
//!   are retried until cancellation.
//! - Every subscription is applied exactly once per connection.
//!
//! ## Features
//! | Feature | Description                                    |
//! |---------|------------------------------------------------|
//! | `kafka` | `KafkaConnector` built on `rdkafka`            |
//! | `mqtt`  | `MqttConnector` built on `rumqttc`             |
//! | `cli`   | the `brokervisor` binary; implies both above   |

mod config;
mod consumer;
mod core;
mod error;
mod events;
mod policies;
mod pubsub;
mod subscribers;

pub mod adapters;
pub mod extract;
pub mod logging;
pub mod memory;

pub use config::{
    AppConfig, KafkaConfig, LogConfig, LogFileConfig, LogFormat, MqttConfig, RejoinConfig,
    ShutdownConfig, SubscriptionConfig,
};
pub use consumer::{
    BrokerEndpoints, ConsumerGroupIdentity, ConsumerHandle, ConsumerOptions, ConsumerSupervisor,
    DEFAULT_FIELDS, FieldLogHandler, GroupConnector, GroupConsumer, HandlerFn, HandlerRef,
    InitialOffset, OffsetTracker, RebalanceStrategy, Record, RecordHandler, Session,
    TopicPartition,
};
pub use self::core::{
    AliveTracker, ConsumerSpec, PubSubSpec, Service, ServiceBuilder, ServiceConfig,
    ShutdownSignal,
};
pub use error::{
    ConfigError, ConnectionError, HandlerError, RuntimeError, SessionError, StartupError,
};
pub use events::{Bus, CONSUMER, Event, EventKind, PUBSUB};
pub use policies::{Backoff, BackoffPolicy, JitterPolicy};
pub use pubsub::{
    ConnectionEvent, ConnectionState, Connector, Credentials, Link, LinkEvent, Message,
    MessageCallback, PubSubHandle, PubSubOptions, PubSubSupervisor, QoS, SubscriptionSet,
    matches as topic_matches, split_broker_url, validate_filter, validate_topic,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
