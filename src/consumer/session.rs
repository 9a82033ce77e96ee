//! # Session runner: fans records of one session out to partition claims.
//!
//! ```text
//! loop (biased):
//!   cancel          → Cancelled
//!   claim finished  → Err ⇒ Failed(err)
//!   room in a queue → drain that partition's backlog; resume it once empty
//!   next_record()   → Some ⇒ queue into claim (spawned lazily per partition)
//!                            queue full ⇒ pause partition, park record
//!                     None ⇒ Ended (rebalance)
//!                     Err  ⇒ Failed(err)
//! then: stop claims (in-flight handler calls finish), close session (commit)
//! ```
//!
//! A slow handler only stalls its own partition: the runner keeps reading
//! the others and keeps noticing rebalances.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::select;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::consumer::claim::Claim;
use crate::consumer::client::Session;
use crate::consumer::handler::HandlerRef;
use crate::consumer::offsets::OffsetTracker;
use crate::consumer::record::{Record, TopicPartition};
use crate::error::SessionError;
use crate::events::Bus;

type Room = (TopicPartition, mpsc::OwnedPermit<Record>);

/// How a session finished.
#[derive(Debug)]
pub(crate) enum SessionOutcome {
    /// The broker ended the session (rebalance/revocation).
    Ended,
    /// The supervisor was cancelled.
    Cancelled,
    Failed(SessionError),
}

pub(crate) struct SessionRunner {
    pub session: Arc<dyn Session>,
    pub handler: HandlerRef,
    pub offsets: OffsetTracker,
    pub bus: Bus,
    pub claim_queue: usize,
}

impl SessionRunner {
    pub async fn run(self, cancel: &CancellationToken) -> SessionOutcome {
        let claims_token = cancel.child_token();
        let mut queues: HashMap<TopicPartition, mpsc::Sender<Record>> = HashMap::new();
        let mut claims: JoinSet<Result<(), SessionError>> = JoinSet::new();
        // Records of paused partitions, in offset order.
        let mut parked: HashMap<TopicPartition, VecDeque<Record>> = HashMap::new();
        let (room_tx, mut room_rx) = mpsc::unbounded_channel::<Room>();
        let mut waiters: JoinSet<()> = JoinSet::new();

        let mut outcome = loop {
            select! {
                biased;
                _ = cancel.cancelled() => break SessionOutcome::Cancelled,
                Some(joined) = claims.join_next() => match joined {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => break SessionOutcome::Failed(e),
                    Err(join_err) => break SessionOutcome::Failed(SessionError::Broker {
                        reason: format!("partition claim aborted: {join_err}"),
                    }),
                },
                Some((tp, permit)) = room_rx.recv() => {
                    let Some(mut backlog) = parked.remove(&tp) else { continue };
                    let Some(first) = backlog.pop_front() else { continue };
                    let queue = permit.send(first);
                    if fill(&queue, &mut backlog) {
                        if let Err(e) = self.session.resume(&tp) {
                            break SessionOutcome::Failed(e);
                        }
                    } else {
                        wait_for_room(&mut waiters, &room_tx, tp.clone(), queue);
                        parked.insert(tp, backlog);
                    }
                }
                next = self.session.next_record() => match next {
                    Ok(Some(record)) => {
                        let tp = record.topic_partition();
                        if let Some(backlog) = parked.get_mut(&tp) {
                            backlog.push_back(record);
                            continue;
                        }
                        let queue = queues.entry(tp.clone()).or_insert_with(|| {
                            let (tx, rx) = mpsc::channel(self.claim_queue.max(1));
                            let claim = Claim {
                                tp: tp.clone(),
                                session: Arc::clone(&self.session),
                                handler: Arc::clone(&self.handler),
                                offsets: self.offsets.clone(),
                                bus: self.bus.clone(),
                            };
                            claims.spawn(claim.run(rx, claims_token.clone()));
                            tx
                        });
                        match queue.try_send(record) {
                            Ok(()) => {}
                            // The claim already stopped; its result surfaces
                            // through `claims`.
                            Err(TrySendError::Closed(_)) => {}
                            Err(TrySendError::Full(record)) => {
                                if let Err(e) = self.session.pause(&tp) {
                                    break SessionOutcome::Failed(e);
                                }
                                wait_for_room(&mut waiters, &room_tx, tp.clone(), queue.clone());
                                parked.insert(tp, VecDeque::from([record]));
                            }
                        }
                    }
                    Ok(None) => break SessionOutcome::Ended,
                    Err(e) => break SessionOutcome::Failed(e),
                },
            }
        };

        // Parked records were never handed to a claim, so they stay unmarked
        // and are delivered again to the next session.
        waiters.shutdown().await;
        drop(parked);
        claims_token.cancel();
        drop(queues);
        while let Some(joined) = claims.join_next().await {
            if let Ok(Err(e)) = joined {
                if matches!(outcome, SessionOutcome::Ended) {
                    outcome = SessionOutcome::Failed(e);
                }
            }
        }

        if let Err(e) = self.session.close().await {
            if !matches!(outcome, SessionOutcome::Failed(_)) {
                outcome = SessionOutcome::Failed(e);
            }
        }
        outcome
    }
}

/// Moves as much of `backlog` into `queue` as fits. Returns `true` once the
/// backlog is empty (or the claim is gone and the rest is dropped).
fn fill(queue: &mpsc::Sender<Record>, backlog: &mut VecDeque<Record>) -> bool {
    while let Some(record) = backlog.pop_front() {
        match queue.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                backlog.push_front(record);
                return false;
            }
            Err(TrySendError::Closed(_)) => {
                backlog.clear();
                return true;
            }
        }
    }
    true
}

fn wait_for_room(
    waiters: &mut JoinSet<()>,
    room: &mpsc::UnboundedSender<Room>,
    tp: TopicPartition,
    queue: mpsc::Sender<Record>,
) {
    let room = room.clone();
    waiters.spawn(async move {
        if let Ok(permit) = queue.reserve_owned().await {
            let _ = room.send((tp, permit));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(offset: i64) -> Record {
        Record::new("events", 0, offset, "x")
    }

    #[tokio::test]
    async fn fill_stops_at_capacity_and_keeps_order() {
        let (tx, mut rx) = mpsc::channel(2);
        let mut backlog: VecDeque<Record> = (0..5).map(record).collect();

        assert!(!fill(&tx, &mut backlog));
        assert_eq!(backlog.front().map(|r| r.offset), Some(2));

        assert_eq!(rx.recv().await.map(|r| r.offset), Some(0));
        assert_eq!(rx.recv().await.map(|r| r.offset), Some(1));
        assert!(!fill(&tx, &mut backlog));
        assert_eq!(backlog.len(), 1);

        drop(rx);
        assert!(fill(&tx, &mut backlog));
        assert!(backlog.is_empty());
    }
}
