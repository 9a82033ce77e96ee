//! # Kafka consumer-group adapter (librdkafka).
//!
//! librdkafka runs the group protocol itself; this adapter maps its
//! rebalance callbacks onto sessions:
//!
//! ```text
//! open()   create StreamConsumer, fetch metadata (reachability), subscribe
//! join()   poll until an assignment is present ─► KafkaSession
//! session  next_record(): Ok(None) once the assignment generation moves on;
//!                         records read across a rebalance are queued for the
//!                         next session, which drops those it was not assigned
//!          pause/resume:  per partition, while its claim queue is full
//!          mark():        store_offset(offset + 1)
//!          close():       commit stored offsets; after a failure, seek every
//!                         assigned partition back to its committed position
//! ```
//!
//! Auto-commit is on but offsets are only *stored* by `mark`, so nothing is
//! committed before the handler succeeded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message as _};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use tokio::select;
use tokio::sync::watch;

use crate::consumer::{
    BrokerEndpoints, ConsumerGroupIdentity, ConsumerOptions, GroupConnector, GroupConsumer,
    InitialOffset, Record, Session, TopicPartition,
};
use crate::error::{SessionError, StartupError};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const OFFSETS_TIMEOUT: Duration = Duration::from_secs(10);

/// Assignment as last reported by librdkafka.
#[derive(Clone, Debug, Default)]
struct Assignment {
    generation: u64,
    partitions: Vec<TopicPartition>,
}

struct GroupContext {
    assignment: watch::Sender<Assignment>,
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(_) = rebalance {
            self.assignment.send_modify(|a| {
                a.generation += 1;
                a.partitions.clear();
            });
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(tpl) = rebalance {
            let partitions = to_partitions(tpl);
            self.assignment.send_modify(|a| {
                a.generation += 1;
                a.partitions = partitions;
            });
        }
    }
}

type GroupStream = StreamConsumer<GroupContext>;

fn to_partitions(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    let mut out: Vec<TopicPartition> = tpl
        .elements()
        .iter()
        .map(|e| TopicPartition::new(e.topic(), e.partition()))
        .collect();
    out.sort();
    out
}

fn to_record(msg: &BorrowedMessage<'_>) -> Record {
    let payload = Bytes::copy_from_slice(msg.payload().unwrap_or_default());
    let record = Record::new(msg.topic(), msg.partition(), msg.offset(), payload);
    match msg.key() {
        Some(key) => record.with_key(Bytes::copy_from_slice(key)),
        None => record,
    }
}

fn broker_error(e: KafkaError) -> SessionError {
    SessionError::Broker {
        reason: e.to_string(),
    }
}

/// Opens librdkafka consumer-group clients.
#[derive(Clone, Debug)]
pub struct KafkaConnector {
    options: ConsumerOptions,
    overrides: Vec<(String, String)>,
}

impl KafkaConnector {
    pub fn new(options: ConsumerOptions) -> Self {
        Self {
            options,
            overrides: Vec::new(),
        }
    }

    /// Sets a raw librdkafka property, applied after the defaults.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    fn client_config(&self, endpoints: &BrokerEndpoints, identity: &ConsumerGroupIdentity) -> ClientConfig {
        let reset = match self.options.initial_offset {
            InitialOffset::Oldest => "earliest",
            InitialOffset::Newest => "latest",
        };
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", endpoints.joined())
            .set("group.id", identity.group())
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", reset)
            .set(
                "partition.assignment.strategy",
                self.options.rebalance.as_kafka_name(),
            )
            .set_log_level(RDKafkaLogLevel::Warning);
        for (k, v) in &self.overrides {
            cfg.set(k, v);
        }
        cfg
    }
}

#[async_trait]
impl GroupConnector for KafkaConnector {
    async fn open(
        &self,
        endpoints: &BrokerEndpoints,
        identity: &ConsumerGroupIdentity,
    ) -> Result<Box<dyn GroupConsumer>, StartupError> {
        let (tx, rx) = watch::channel(Assignment::default());
        let consumer: GroupStream = self
            .client_config(endpoints, identity)
            .create_with_context(GroupContext { assignment: tx })
            .map_err(|e| StartupError::Client {
                reason: e.to_string(),
            })?;
        let consumer = Arc::new(consumer);

        let probe = Arc::clone(&consumer);
        tokio::task::spawn_blocking(move || probe.fetch_metadata(None, METADATA_TIMEOUT).map(|_| ()))
            .await
            .map_err(|e| StartupError::Client {
                reason: e.to_string(),
            })?
            .map_err(|e| StartupError::Unreachable {
                endpoints: endpoints.joined(),
                reason: e.to_string(),
            })?;

        let topics: Vec<&str> = identity.topics().iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| StartupError::Client {
                reason: e.to_string(),
            })?;

        Ok(Box::new(KafkaGroup {
            consumer,
            assignment: rx,
            initial_offset: self.options.initial_offset,
            pending: Pending::default(),
        }))
    }
}

/// Records received while no session was reading, in arrival order.
#[derive(Clone, Default)]
struct Pending(Arc<Mutex<VecDeque<Record>>>);

impl Pending {
    fn push(&self, record: Record) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(record);
    }

    /// Oldest record whose partition is in `assigned`. Records of partitions
    /// no longer assigned are dropped; their new owner fetches them from the
    /// committed offset.
    fn take_for(&self, assigned: &[TopicPartition]) -> Option<Record> {
        let mut queue = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(record) = queue.pop_front() {
            if assigned.contains(&record.topic_partition()) {
                return Some(record);
            }
        }
        None
    }
}

fn partition_list(tp: &TopicPartition) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(&tp.topic, tp.partition);
    tpl
}

struct KafkaGroup {
    consumer: Arc<GroupStream>,
    assignment: watch::Receiver<Assignment>,
    initial_offset: InitialOffset,
    pending: Pending,
}

#[async_trait]
impl GroupConsumer for KafkaGroup {
    async fn join(&self, session_id: u64) -> Result<Arc<dyn Session>, SessionError> {
        let mut rx = self.assignment.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            if !current.partitions.is_empty() {
                return Ok(Arc::new(KafkaSession {
                    id: session_id,
                    generation: current.generation,
                    partitions: current.partitions,
                    consumer: Arc::clone(&self.consumer),
                    assignment: rx,
                    pending: self.pending.clone(),
                    initial_offset: self.initial_offset,
                    rebalanced: Mutex::new(false),
                }));
            }
            // Rebalance callbacks only fire while the consumer is polled.
            select! {
                changed = rx.changed() => {
                    changed.map_err(|_| SessionError::Closed)?;
                }
                msg = self.consumer.recv() => {
                    let msg = msg.map_err(|e| SessionError::Join { reason: e.to_string() })?;
                    self.pending.push(to_record(&msg));
                }
            }
        }
    }

    async fn close(&self) {
        self.consumer.unsubscribe();
    }
}

struct KafkaSession {
    id: u64,
    generation: u64,
    partitions: Vec<TopicPartition>,
    consumer: Arc<GroupStream>,
    assignment: watch::Receiver<Assignment>,
    pending: Pending,
    initial_offset: InitialOffset,
    rebalanced: Mutex<bool>,
}

impl KafkaSession {
    fn moved_on(&self) -> bool {
        let moved = self.assignment.borrow().generation != self.generation;
        if moved {
            *self.rebalanced.lock().unwrap_or_else(PoisonError::into_inner) = true;
        }
        moved
    }

    /// Seeks every assigned partition back to its committed offset so that
    /// unacknowledged records are read again by the next session.
    async fn rewind(&self) -> Result<(), SessionError> {
        let consumer = Arc::clone(&self.consumer);
        let partitions = self.partitions.clone();
        let fallback = match self.initial_offset {
            InitialOffset::Oldest => Offset::Beginning,
            InitialOffset::Newest => Offset::End,
        };
        tokio::task::spawn_blocking(move || -> Result<(), KafkaError> {
            let mut tpl = TopicPartitionList::new();
            for tp in &partitions {
                tpl.add_partition(&tp.topic, tp.partition);
            }
            let committed = consumer.committed_offsets(tpl, OFFSETS_TIMEOUT)?;
            for e in committed.elements() {
                let target = match e.offset() {
                    Offset::Offset(o) => Offset::Offset(o),
                    _ => fallback,
                };
                consumer.seek(e.topic(), e.partition(), target, OFFSETS_TIMEOUT)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| SessionError::Broker {
            reason: e.to_string(),
        })?
        .map_err(broker_error)
    }
}

#[async_trait]
impl Session for KafkaSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn assignment(&self) -> Vec<TopicPartition> {
        self.partitions.clone()
    }

    async fn next_record(&self) -> Result<Option<Record>, SessionError> {
        if let Some(rec) = self.pending.take_for(&self.partitions) {
            return Ok(Some(rec));
        }
        let mut rx = self.assignment.clone();
        loop {
            if self.moved_on() {
                return Ok(None);
            }
            select! {
                changed = rx.changed() => {
                    changed.map_err(|_| SessionError::Closed)?;
                }
                msg = self.consumer.recv() => {
                    let rec = to_record(&msg.map_err(broker_error)?);
                    if self.moved_on() {
                        self.pending.push(rec);
                        return Ok(None);
                    }
                    return Ok(Some(rec));
                }
            }
        }
    }

    fn mark(&self, record: &Record) -> Result<(), SessionError> {
        self.consumer
            .store_offset(&record.topic, record.partition, record.offset + 1)
            .map_err(|e| SessionError::Commit {
                topic: record.topic.to_string(),
                partition: record.partition,
                offset: record.offset,
                reason: e.to_string(),
            })
    }

    fn pause(&self, tp: &TopicPartition) -> Result<(), SessionError> {
        self.consumer.pause(&partition_list(tp)).map_err(broker_error)
    }

    fn resume(&self, tp: &TopicPartition) -> Result<(), SessionError> {
        self.consumer.resume(&partition_list(tp)).map_err(broker_error)
    }

    async fn close(&self) -> Result<(), SessionError> {
        let consumer = Arc::clone(&self.consumer);
        let committed = tokio::task::spawn_blocking(move || consumer.commit_consumer_state(CommitMode::Sync))
            .await
            .map_err(|e| SessionError::Broker {
                reason: e.to_string(),
            })?;
        match committed {
            Ok(()) | Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => return Err(broker_error(e)),
        }

        let rebalanced = *self.rebalanced.lock().unwrap_or_else(PoisonError::into_inner);
        if !rebalanced && !self.moved_on() {
            self.rewind().await?;
        }
        Ok(())
    }
}
