//! # Runtime events emitted by the supervisors.
//!
//! The [`EventKind`] enum classifies events into four groups:
//! - **Consumer events**: group sessions, claims, per-record progress
//! - **Connection events**: pub/sub connect, loss, resubscription, close
//! - **Shutdown events**: orchestrator shutdown and grace handling
//! - **Subscriber events**: overflow and panics of event subscribers
//!
//! The [`Event`] struct carries the metadata relevant to each kind (session id,
//! topic, partition, offset, delays, reasons, decoded payload fields).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically; use it to restore order when events arrive out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use brokervisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RejoinScheduled)
//!     .with_component("consumer")
//!     .with_reason("broker transport failure")
//!     .with_attempt(3)
//!     .with_delay(Duration::from_millis(400));
//!
//! assert_eq!(ev.kind, EventKind::RejoinScheduled);
//! assert_eq!(ev.component.as_deref(), Some("consumer"));
//! assert_eq!(ev.delay_ms, Some(400));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Component name used by the consumer supervisor.
pub const CONSUMER: &str = "consumer";
/// Component name used by the pub/sub supervisor.
pub const PUBSUB: &str = "pubsub";

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `component` (subscriber name), `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `component` (subscriber name), `reason`.
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or external cancellation).
    ShutdownRequested,

    /// Every component stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; `reason` lists the stuck components.
    GraceExceeded,

    // === Consumer events ===
    /// The consumer group client is open and the rejoin loop is running.
    ///
    /// Sets: `component`, `reason` (group and topics).
    ConsumerStarted,

    /// The consumer could not be started. Fatal for the process.
    ///
    /// Sets: `component`, `reason`.
    StartupFailed,

    /// A join attempt is starting.
    ///
    /// Sets: `component`, `attempt` (1-based, lifetime counter).
    SessionJoining,

    /// Group membership succeeded and a new session is active.
    ///
    /// Sets: `component`, `session`, `attempt`, `reason` (assignment summary).
    SessionJoined,

    /// Joining the group failed; a rejoin will be scheduled.
    ///
    /// Sets: `component`, `attempt`, `reason`.
    JoinFailed,

    /// A session ended without error (rebalance, revocation, cancellation).
    ///
    /// Sets: `component`, `session`, `reason`.
    SessionEnded,

    /// A session ended because of an error (broker, commit, handler failure).
    ///
    /// Sets: `component`, `session`, `reason`.
    SessionFailed,

    /// Next join attempt scheduled after a delay.
    ///
    /// Sets: `component`, `attempt` (consecutive failures), `delay_ms`, `reason`.
    RejoinScheduled,

    /// A claim on one partition started inside a session.
    ///
    /// Sets: `component`, `session`, `topic`, `partition`.
    ClaimStarted,

    /// A claim stopped (session ended or handler failed).
    ///
    /// Sets: `component`, `session`, `topic`, `partition`, `offset` (last acked).
    ClaimStopped,

    /// A record was received by a claim (verbose).
    ///
    /// Sets: `component`, `session`, `topic`, `partition`, `offset`, `bytes`.
    RecordReceived,

    /// A record was handled and its offset marked for commit.
    ///
    /// Sets: `component`, `session`, `topic`, `partition`, `offset`.
    RecordAcked,

    /// The handler reported a failure; the offset is withheld.
    ///
    /// Sets: `component`, `session`, `topic`, `partition`, `offset`, `reason`.
    RecordRejected,

    /// Named fields were decoded from a record payload.
    ///
    /// Sets: `component` (handler), `topic`, `partition`, `offset`, `fields`.
    RecordDecoded,

    /// The rejoin loop exited after cancellation.
    ConsumerStopped,

    // === Connection events ===
    /// A connection attempt is starting.
    ///
    /// Sets: `component`, `attempt`, `reason` (endpoint).
    Connecting,

    /// The connection is established.
    ///
    /// Sets: `component`, `session` (connection epoch), `reason` (endpoint).
    Connected,

    /// A connection attempt failed.
    ///
    /// Sets: `component`, `attempt`, `reason`.
    ConnectFailed,

    /// The bounded wait for the first connection expired. Not fatal.
    ///
    /// Sets: `component`, `timeout_ms`.
    ConnectTimedOut,

    /// An established connection was lost.
    ///
    /// Sets: `component`, `session` (epoch), `reason` (cause).
    ConnectionLost,

    /// Next connection attempt scheduled.
    ///
    /// Sets: `component`, `attempt`, `delay_ms`.
    ReconnectScheduled,

    /// A subscription was (re)applied on a fresh connection.
    ///
    /// Sets: `component`, `session` (epoch), `topic` (filter).
    Resubscribed,

    /// Applying a subscription failed.
    ///
    /// Sets: `component`, `session` (epoch), `topic` (filter), `reason`.
    SubscribeFailed,

    /// The connection reached its terminal `Closed` state.
    ConnectionClosed,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Emitting component (`consumer`, `pubsub`, subscriber name, ...).
    pub component: Option<Arc<str>>,
    /// Session id (consumer) or connection epoch (pub/sub).
    pub session: Option<u64>,
    /// Topic name or topic filter.
    pub topic: Option<Arc<str>>,
    /// Partition number.
    pub partition: Option<i32>,
    /// Record offset.
    pub offset: Option<i64>,
    /// Payload size in bytes.
    pub bytes: Option<usize>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Delay before the next attempt, in milliseconds.
    pub delay_ms: Option<u32>,
    /// Timeout that expired, in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Human-readable reason (errors, causes, summaries).
    pub reason: Option<Arc<str>>,
    /// Decoded `(name, value)` pairs.
    pub fields: Option<Arc<[(String, String)]>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            component: None,
            session: None,
            topic: None,
            partition: None,
            offset: None,
            bytes: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
            reason: None,
            fields: None,
        }
    }

    #[inline]
    pub fn with_component(mut self, component: impl Into<Arc<str>>) -> Self {
        self.component = Some(component.into());
        self
    }

    #[inline]
    pub fn with_session(mut self, session: u64) -> Self {
        self.session = Some(session);
        self
    }

    #[inline]
    pub fn with_topic(mut self, topic: impl Into<Arc<str>>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    #[inline]
    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    #[inline]
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[inline]
    pub fn with_bytes(mut self, bytes: usize) -> Self {
        self.bytes = Some(bytes);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds, saturating).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    /// Attaches a timeout (stored as milliseconds, saturating).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_fields(mut self, fields: Vec<(String, String)>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_component(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_component(subscriber)
            .with_reason(info)
    }

    /// Looks up a decoded field by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .as_deref()?
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::new(EventKind::Connecting);
        let b = Event::new(EventKind::Connected);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delay_saturates_at_u32() {
        let ev = Event::new(EventKind::ReconnectScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }

    #[test]
    fn field_lookup() {
        let ev = Event::new(EventKind::RecordDecoded).with_fields(vec![
            ("deviceId".into(), "d-1".into()),
            ("uuid".into(), String::new()),
        ]);
        assert_eq!(ev.field("deviceId"), Some("d-1"));
        assert_eq!(ev.field("uuid"), Some(""));
        assert_eq!(ev.field("oid"), None);
    }
}
