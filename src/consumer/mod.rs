//! # Consumer-group supervision for partitioned logs.
//!
//! - [`ConsumerSupervisor`] opens a group client and keeps rejoining the
//!   group until cancelled.
//! - Each session fans records out to one claim per partition; a claim runs
//!   the [`RecordHandler`] sequentially and marks offsets only on success.
//! - [`GroupConnector`] / [`GroupConsumer`] / [`Session`] abstract the client.

mod claim;
mod client;
mod handler;
mod identity;
mod offsets;
mod record;
mod session;
mod supervisor;

pub use client::{GroupConnector, GroupConsumer, Session};
pub use handler::{DEFAULT_FIELDS, FieldLogHandler, HandlerFn, HandlerRef, RecordHandler};
pub use identity::{
    BrokerEndpoints, ConsumerGroupIdentity, ConsumerOptions, InitialOffset, RebalanceStrategy,
};
pub use offsets::OffsetTracker;
pub use record::{Record, TopicPartition};
pub use supervisor::{ConsumerHandle, ConsumerSupervisor};
