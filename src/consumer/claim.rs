//! # Partition claim: sequential processing of one partition within a session.
//!
//! ```text
//! session runner ──► [bounded queue] ──► Claim::run
//!                                          │ offset <= last delivered? skip
//!                                          │ handler.handle(&record)
//!                                          ├─ Ok  → session.mark → tracker.ack → RecordAcked
//!                                          └─ Err → RecordRejected, stop with HandlerFailed
//! ```
//!
//! Cancellation is only observed between records: a handler call that has
//! started always runs to completion.

use std::sync::Arc;

use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::consumer::client::Session;
use crate::consumer::handler::HandlerRef;
use crate::consumer::offsets::OffsetTracker;
use crate::consumer::record::{Record, TopicPartition};
use crate::error::SessionError;
use crate::events::{Bus, CONSUMER, Event, EventKind};

pub(crate) struct Claim {
    pub tp: TopicPartition,
    pub session: Arc<dyn Session>,
    pub handler: HandlerRef,
    pub offsets: OffsetTracker,
    pub bus: Bus,
}

impl Claim {
    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_component(CONSUMER)
            .with_session(self.session.id())
            .with_topic(Arc::clone(&self.tp.topic))
            .with_partition(self.tp.partition)
    }

    /// Processes queued records until the queue closes, `token` is cancelled,
    /// or the handler rejects a record.
    pub async fn run(
        self,
        mut queue: mpsc::Receiver<Record>,
        token: CancellationToken,
    ) -> Result<(), SessionError> {
        self.bus.publish(self.event(EventKind::ClaimStarted));

        let mut last: Option<i64> = None;
        let result = loop {
            let record = select! {
                biased;
                _ = token.cancelled() => break Ok(()),
                next = queue.recv() => match next {
                    Some(record) => record,
                    None => break Ok(()),
                },
            };

            // Brokers may redeliver within a session; each offset is handled once.
            if last.is_some_and(|prev| record.offset <= prev) {
                continue;
            }
            last = Some(record.offset);

            self.bus.publish(
                self.event(EventKind::RecordReceived)
                    .with_offset(record.offset)
                    .with_bytes(record.payload.len()),
            );

            match self.handler.handle(&record).await {
                Ok(()) => {
                    if let Err(e) = self.session.mark(&record) {
                        break Err(e);
                    }
                    self.offsets.ack(&self.tp, record.offset);
                    self.bus.publish(
                        self.event(EventKind::RecordAcked)
                            .with_offset(record.offset),
                    );
                }
                Err(e) => {
                    self.bus.publish(
                        self.event(EventKind::RecordRejected)
                            .with_offset(record.offset)
                            .with_reason(e.to_string()),
                    );
                    break Err(SessionError::HandlerFailed {
                        topic: record.topic.to_string(),
                        partition: record.partition,
                        offset: record.offset,
                        reason: e.to_string(),
                    });
                }
            }
        };

        let mut stopped = self.event(EventKind::ClaimStopped);
        if let Some(off) = self.offsets.get(&self.tp) {
            stopped = stopped.with_offset(off);
        }
        self.bus.publish(stopped);
        result
    }
}
