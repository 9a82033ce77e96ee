//! # Seam between the supervisor and a concrete partitioned-log client.
//!
//! ```text
//! GroupConnector::open(endpoints, identity)   fatal on failure (StartupError)
//!        │
//!        ▼
//! GroupConsumer::join(session_id)  ──► Session (one group generation)
//!        ▲                                │ next_record()  Ok(None) = rebalance
//!        │                                │ mark(record)   record fully processed
//!        └───────── rejoin ◄──────────────┘ close()        commit marked offsets
//! ```
//!
//! Implementations: [`MemoryLog`](crate::memory::MemoryLog) for tests and
//! embedding, `KafkaConnector` (feature `kafka`) for real clusters.

use std::sync::Arc;

use async_trait::async_trait;

use crate::consumer::identity::{BrokerEndpoints, ConsumerGroupIdentity};
use crate::consumer::record::{Record, TopicPartition};
use crate::error::{SessionError, StartupError};

/// Opens group clients.
#[async_trait]
pub trait GroupConnector: Send + Sync + 'static {
    /// Creates the client and verifies that the brokers are reachable.
    ///
    /// Any error here is fatal for the process.
    async fn open(
        &self,
        endpoints: &BrokerEndpoints,
        identity: &ConsumerGroupIdentity,
    ) -> Result<Box<dyn GroupConsumer>, StartupError>;
}

/// An open group client, able to join the group repeatedly.
#[async_trait]
pub trait GroupConsumer: Send + Sync {
    /// Joins the group and returns the resulting session.
    ///
    /// `session_id` is chosen by the supervisor and strictly increases
    /// across calls.
    async fn join(&self, session_id: u64) -> Result<Arc<dyn Session>, SessionError>;

    /// Leaves the group and releases the client.
    async fn close(&self);
}

/// One group generation: a fixed partition assignment.
#[async_trait]
pub trait Session: Send + Sync {
    fn id(&self) -> u64;

    /// Partitions assigned to this member for the lifetime of the session.
    fn assignment(&self) -> Vec<TopicPartition>;

    /// Next record from any assigned partition.
    ///
    /// `Ok(None)` means the session ended cleanly (rebalance or revocation).
    /// Must be cancel-safe: dropping the future must not lose a record.
    async fn next_record(&self) -> Result<Option<Record>, SessionError>;

    /// Marks `record` as fully processed so its offset is committed.
    fn mark(&self, record: &Record) -> Result<(), SessionError>;

    /// Stops fetching from `tp` until [`resume`](Session::resume) is called.
    /// Records already buffered for `tp` may still be returned.
    fn pause(&self, tp: &TopicPartition) -> Result<(), SessionError>;

    fn resume(&self, tp: &TopicPartition) -> Result<(), SessionError>;

    /// Ends the session, committing marked offsets.
    async fn close(&self) -> Result<(), SessionError>;
}
