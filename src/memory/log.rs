//! # In-memory partitioned log with consumer-group offsets.
//!
//! [`MemoryLog`] implements [`GroupConnector`] so the consumer supervisor can
//! run without a broker. It models what the supervisor relies on:
//!
//! - topics with a fixed number of partitions and strictly increasing offsets
//! - committed offsets per `(group, partition)`, written when a session closes
//! - a single member per group receiving every partition of its topics
//! - fault injection: unreachable brokers, failing joins, broker errors,
//!   forced rebalances
//!
//! Offsets marked by a session are only committed by [`Session::close`]; a
//! session that cannot close leaves them uncommitted, so the records are
//! delivered again to the next session.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::consumer::{
    BrokerEndpoints, ConsumerGroupIdentity, GroupConnector, GroupConsumer, InitialOffset, Record,
    Session, TopicPartition,
};
use crate::error::{SessionError, StartupError};

/// Shared in-memory log. Clones refer to the same log.
#[derive(Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    changed: Notify,
}

#[derive(Default)]
struct State {
    partitions: BTreeMap<TopicPartition, Vec<Record>>,
    next_offset: HashMap<TopicPartition, i64>,
    committed: HashMap<(String, TopicPartition), i64>,
    unreachable: bool,
    initial_offset: InitialOffset,
    join_failures: VecDeque<String>,
    broker_errors: VecDeque<String>,
    generation: u64,
    joined: Vec<u64>,
    active: usize,
    max_active: usize,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.inner.changed.notify_waiters();
    }

    /// Creates `topic` with `partitions` partitions whose first offset is 0.
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        self.create_topic_at(topic, partitions, 0);
    }

    /// Creates `topic` with every partition starting at `first_offset`.
    pub fn create_topic_at(&self, topic: &str, partitions: i32, first_offset: i64) {
        let mut st = self.lock();
        for p in 0..partitions {
            let tp = TopicPartition::new(topic, p);
            st.partitions.entry(tp.clone()).or_default();
            st.next_offset.entry(tp).or_insert(first_offset);
        }
    }

    /// Appends a record and returns its offset.
    ///
    /// Producing to an unknown partition creates it, starting at offset 0.
    pub fn produce(&self, topic: &str, partition: i32, payload: impl Into<Bytes>) -> i64 {
        let offset = {
            let mut st = self.lock();
            let tp = TopicPartition::new(topic, partition);
            let next = st.next_offset.entry(tp.clone()).or_insert(0);
            let offset = *next;
            *next += 1;
            st.partitions
                .entry(tp)
                .or_default()
                .push(Record::new(topic, partition, offset, payload));
            offset
        };
        self.notify();
        offset
    }

    /// Where groups without a committed offset start reading.
    pub fn set_initial_offset(&self, initial: InitialOffset) {
        self.lock().initial_offset = initial;
    }

    /// Makes every broker operation fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
        self.notify();
    }

    /// The next `n` joins fail with `reason`.
    pub fn fail_next_joins(&self, n: usize, reason: &str) {
        let mut st = self.lock();
        st.join_failures.extend(std::iter::repeat_n(reason.to_string(), n));
    }

    /// The active session's next read fails with `reason`.
    pub fn inject_broker_error(&self, reason: &str) {
        self.lock().broker_errors.push_back(reason.to_string());
        self.notify();
    }

    /// Ends the active session cleanly, as a group rebalance would.
    pub fn rebalance(&self) {
        self.lock().generation += 1;
        self.notify();
    }

    /// Next offset the group will read from `topic/partition`, if committed.
    pub fn committed(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.lock()
            .committed
            .get(&(group.to_string(), TopicPartition::new(topic, partition)))
            .copied()
    }

    /// Ids of all sessions joined so far, in join order.
    pub fn joined_sessions(&self) -> Vec<u64> {
        self.lock().joined.clone()
    }

    /// Sessions currently open.
    pub fn active_sessions(&self) -> usize {
        self.lock().active
    }

    /// Largest number of sessions that were ever open at the same time.
    pub fn max_concurrent_sessions(&self) -> usize {
        self.lock().max_active
    }
}

#[async_trait]
impl GroupConnector for MemoryLog {
    async fn open(
        &self,
        endpoints: &BrokerEndpoints,
        identity: &ConsumerGroupIdentity,
    ) -> Result<Box<dyn GroupConsumer>, StartupError> {
        if self.lock().unreachable {
            return Err(StartupError::Unreachable {
                endpoints: endpoints.joined(),
                reason: "connection refused".into(),
            });
        }
        Ok(Box::new(MemoryGroupConsumer {
            log: self.clone(),
            identity: identity.clone(),
        }))
    }
}

struct MemoryGroupConsumer {
    log: MemoryLog,
    identity: ConsumerGroupIdentity,
}

#[async_trait]
impl GroupConsumer for MemoryGroupConsumer {
    async fn join(&self, session_id: u64) -> Result<Arc<dyn Session>, SessionError> {
        let mut st = self.log.lock();
        if st.unreachable {
            return Err(SessionError::Join {
                reason: "broker unreachable".into(),
            });
        }
        if let Some(reason) = st.join_failures.pop_front() {
            return Err(SessionError::Join { reason });
        }

        let group = self.identity.group().to_string();
        let mut positions = BTreeMap::new();
        for (tp, records) in &st.partitions {
            if !self.identity.topics().iter().any(|t| **t == *tp.topic) {
                continue;
            }
            let start = match st.committed.get(&(group.clone(), tp.clone())) {
                Some(next) => *next,
                None => match st.initial_offset {
                    InitialOffset::Oldest => records.first().map_or_else(
                        || st.next_offset.get(tp).copied().unwrap_or(0),
                        |r| r.offset,
                    ),
                    InitialOffset::Newest => st.next_offset.get(tp).copied().unwrap_or(0),
                },
            };
            positions.insert(tp.clone(), start);
        }

        st.joined.push(session_id);
        st.active += 1;
        st.max_active = st.max_active.max(st.active);

        Ok(Arc::new(MemorySession {
            id: session_id,
            group,
            generation: st.generation,
            log: self.log.clone(),
            cursor: Mutex::new(Cursor {
                positions,
                next_index: 0,
            }),
            paused: Mutex::new(HashSet::new()),
            marked: Mutex::new(HashMap::new()),
            closed: Mutex::new(false),
        }))
    }

    async fn close(&self) {}
}

struct Cursor {
    positions: BTreeMap<TopicPartition, i64>,
    // Round-robin start point across partitions.
    next_index: usize,
}

struct MemorySession {
    id: u64,
    group: String,
    generation: u64,
    log: MemoryLog,
    cursor: Mutex<Cursor>,
    paused: Mutex<HashSet<TopicPartition>>,
    marked: Mutex<HashMap<TopicPartition, i64>>,
    closed: Mutex<bool>,
}

impl MemorySession {
    fn poll_once(&self) -> Option<Result<Option<Record>, SessionError>> {
        let mut st = self.log.lock();
        if st.unreachable {
            return Some(Err(SessionError::Broker {
                reason: "broker unreachable".into(),
            }));
        }
        if let Some(reason) = st.broker_errors.pop_front() {
            return Some(Err(SessionError::Broker { reason }));
        }
        if st.generation != self.generation {
            return Some(Ok(None));
        }

        let paused = self.paused.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let n = cursor.positions.len();
        let keys: Vec<TopicPartition> = cursor.positions.keys().cloned().collect();
        for step in 0..n {
            let idx = (cursor.next_index + step) % n;
            let tp = &keys[idx];
            if paused.contains(tp) {
                continue;
            }
            let pos = cursor.positions[tp];
            let Some(records) = st.partitions.get(tp) else {
                continue;
            };
            let at = records.partition_point(|r| r.offset < pos);
            if let Some(record) = records.get(at) {
                let record = record.clone();
                cursor.positions.insert(tp.clone(), record.offset + 1);
                cursor.next_index = (idx + 1) % n;
                return Some(Ok(Some(record)));
            }
        }
        None
    }
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> u64 {
        self.id
    }

    fn assignment(&self) -> Vec<TopicPartition> {
        self.cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .positions
            .keys()
            .cloned()
            .collect()
    }

    async fn next_record(&self) -> Result<Option<Record>, SessionError> {
        loop {
            let changed = self.log.inner.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if let Some(res) = self.poll_once() {
                return res;
            }
            changed.await;
        }
    }

    fn mark(&self, record: &Record) -> Result<(), SessionError> {
        let mut marked = self.marked.lock().unwrap_or_else(PoisonError::into_inner);
        marked
            .entry(record.topic_partition())
            .and_modify(|cur| *cur = (*cur).max(record.offset))
            .or_insert(record.offset);
        Ok(())
    }

    fn pause(&self, tp: &TopicPartition) -> Result<(), SessionError> {
        self.paused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tp.clone());
        Ok(())
    }

    fn resume(&self, tp: &TopicPartition) -> Result<(), SessionError> {
        let removed = self
            .paused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tp);
        if removed {
            self.log.inner.changed.notify_waiters();
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut st = self.log.lock();
        {
            let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
            if *closed {
                return Ok(());
            }
            *closed = true;
        }
        st.active = st.active.saturating_sub(1);
        if st.unreachable {
            return Err(SessionError::Broker {
                reason: "broker unreachable; marked offsets not committed".into(),
            });
        }

        let marked =
            std::mem::take(&mut *self.marked.lock().unwrap_or_else(PoisonError::into_inner));
        for (tp, offset) in marked {
            let next = st.committed.entry((self.group.clone(), tp)).or_insert(offset + 1);
            *next = (*next).max(offset + 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(log: &MemoryLog, topics: &[&str]) -> Box<dyn GroupConsumer> {
        let identity = ConsumerGroupIdentity::new("g1", topics.iter().copied()).unwrap();
        let endpoints = BrokerEndpoints::new(["mem:9092"]).unwrap();
        log.open(&endpoints, &identity).await.unwrap()
    }

    #[tokio::test]
    async fn unreachable_log_refuses_to_open() {
        let log = MemoryLog::new();
        log.set_reachable(false);
        let identity = ConsumerGroupIdentity::new("g1", ["events"]).unwrap();
        let endpoints = BrokerEndpoints::new(["mem:9092"]).unwrap();
        assert!(matches!(
            log.open(&endpoints, &identity).await,
            Err(StartupError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn commits_marked_offsets_on_close() {
        let log = MemoryLog::new();
        log.create_topic_at("events", 1, 10);
        for _ in 0..3 {
            log.produce("events", 0, "{}");
        }

        let consumer = open(&log, &["events"]).await;
        let session = consumer.join(1).await.unwrap();
        assert_eq!(session.assignment(), vec![TopicPartition::new("events", 0)]);

        let first = session.next_record().await.unwrap().unwrap();
        assert_eq!(first.offset, 10);
        session.mark(&first).unwrap();
        session.close().await.unwrap();
        assert_eq!(log.committed("g1", "events", 0), Some(11));

        let next = consumer.join(2).await.unwrap();
        assert_eq!(next.next_record().await.unwrap().unwrap().offset, 11);
    }

    #[tokio::test]
    async fn rebalance_ends_the_session_cleanly() {
        let log = MemoryLog::new();
        log.create_topic("events", 2);
        let consumer = open(&log, &["events"]).await;
        let session = consumer.join(1).await.unwrap();

        let reader = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.next_record().await })
        };
        tokio::task::yield_now().await;
        log.rebalance();

        assert_eq!(reader.await.unwrap(), Ok(None));
    }

    #[tokio::test]
    async fn reads_round_robin_across_partitions() {
        let log = MemoryLog::new();
        log.create_topic("events", 2);
        log.produce("events", 0, "a");
        log.produce("events", 0, "b");
        log.produce("events", 1, "c");

        let consumer = open(&log, &["events"]).await;
        let session = consumer.join(1).await.unwrap();
        let mut seen = Vec::new();
        for _ in 0..3 {
            let rec = session.next_record().await.unwrap().unwrap();
            seen.push((rec.partition, rec.offset));
        }
        assert_eq!(seen, vec![(0, 0), (1, 0), (0, 1)]);
    }

    #[tokio::test]
    async fn paused_partition_is_skipped_until_resumed() {
        let log = MemoryLog::new();
        log.create_topic("events", 2);
        log.produce("events", 0, "a");
        log.produce("events", 1, "b");

        let consumer = open(&log, &["events"]).await;
        let session = consumer.join(1).await.unwrap();
        let p0 = TopicPartition::new("events", 0);
        session.pause(&p0).unwrap();

        assert_eq!(session.next_record().await.unwrap().unwrap().partition, 1);
        let reader = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.next_record().await })
        };
        tokio::task::yield_now().await;
        assert!(!reader.is_finished());

        session.resume(&p0).unwrap();
        let rec = reader.await.unwrap().unwrap().unwrap();
        assert_eq!((rec.partition, rec.offset), (0, 0));
    }
}
