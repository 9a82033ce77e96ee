//! # Consumer supervisor: keeps a consumer-group member alive until cancelled.
//!
//! ```text
//! start(cancel, identity, endpoints, handler)
//!   └─► GroupConnector::open()          failure → StartupError (fatal)
//!   └─► spawn rejoin loop ──────────────────────────────────────────────┐
//!                                                                       │
//! rejoin loop:                                                          │
//!   SessionJoining ─► join(id) ──Err──► JoinFailed ─► RejoinScheduled ──┤ backoff
//!                       │ Ok                                            │
//!                       ▼                                               │
//!                 SessionJoined ─► SessionRunner::run()                 │
//!                                   ├─ Ended     → SessionEnded ────────┤ immediate
//!                                   ├─ Failed    → SessionFailed ───────┤ backoff
//!                                   └─ Cancelled → SessionEnded, exit   │
//!   on exit: GroupConsumer::close(), ConsumerStopped ◄──────────────────┘
//! ```
//!
//! ## Rules
//! - At most one session is active at a time; ids strictly increase.
//! - Only failures before the first join are fatal. Everything after is retried.
//! - The backoff resets after a clean session end or a session that
//!   acknowledged at least one record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::{select, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::consumer::client::{GroupConnector, GroupConsumer};
use crate::consumer::handler::HandlerRef;
use crate::consumer::identity::{BrokerEndpoints, ConsumerGroupIdentity, ConsumerOptions};
use crate::consumer::offsets::OffsetTracker;
use crate::consumer::record::TopicPartition;
use crate::consumer::session::{SessionOutcome, SessionRunner};
use crate::error::{SessionError, StartupError};
use crate::events::{Bus, CONSUMER, Event, EventKind};
use crate::policies::Backoff;

/// Starts consumer-group members.
pub struct ConsumerSupervisor {
    connector: Arc<dyn GroupConnector>,
    options: ConsumerOptions,
    bus: Bus,
}

impl ConsumerSupervisor {
    pub fn new(connector: Arc<dyn GroupConnector>, bus: Bus) -> Self {
        Self {
            connector,
            options: ConsumerOptions::default(),
            bus,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ConsumerOptions) -> Self {
        self.options = options;
        self
    }

    /// Opens the group client and starts the rejoin loop in the background.
    ///
    /// Returns only after the client is open; the first session may still be
    /// joining. Cancelling `cancel` stops the loop after the current session
    /// has drained its in-flight records and committed.
    pub async fn start(
        self,
        cancel: CancellationToken,
        identity: ConsumerGroupIdentity,
        endpoints: BrokerEndpoints,
        handler: HandlerRef,
    ) -> Result<ConsumerHandle, StartupError> {
        let consumer = match self.connector.open(&endpoints, &identity).await {
            Ok(consumer) => consumer,
            Err(e) => {
                self.bus.publish(
                    Event::new(EventKind::StartupFailed)
                        .with_component(CONSUMER)
                        .with_reason(e.to_string()),
                );
                return Err(e);
            }
        };
        self.bus.publish(
            Event::new(EventKind::ConsumerStarted)
                .with_component(CONSUMER)
                .with_reason(format!("{identity} brokers={endpoints}")),
        );

        let offsets = OffsetTracker::new();
        let sessions = Arc::new(AtomicU64::new(0));
        let rejoin = RejoinLoop {
            consumer,
            handler,
            options: self.options,
            offsets: offsets.clone(),
            sessions: Arc::clone(&sessions),
            bus: self.bus,
        };
        let task = tokio::spawn(rejoin.run(cancel));

        Ok(ConsumerHandle {
            task,
            offsets,
            sessions,
        })
    }
}

/// Handle to a running consumer supervisor.
pub struct ConsumerHandle {
    task: JoinHandle<()>,
    offsets: OffsetTracker,
    sessions: Arc<AtomicU64>,
}

impl ConsumerHandle {
    /// Highest acknowledged offset per partition.
    pub fn acknowledged(&self) -> BTreeMap<TopicPartition, i64> {
        self.offsets.snapshot()
    }

    /// Shared tracker behind [`acknowledged`](Self::acknowledged).
    pub fn offsets(&self) -> &OffsetTracker {
        &self.offsets
    }

    /// Number of sessions joined so far.
    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the rejoin loop to exit (after cancellation).
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

struct RejoinLoop {
    consumer: Box<dyn GroupConsumer>,
    handler: HandlerRef,
    options: ConsumerOptions,
    offsets: OffsetTracker,
    sessions: Arc<AtomicU64>,
    bus: Bus,
}

impl RejoinLoop {
    fn event(kind: EventKind) -> Event {
        Event::new(kind).with_component(CONSUMER)
    }

    async fn run(self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.options.rejoin);
        let mut attempt: u32 = 0;
        let mut next_id: u64 = 1;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            attempt = attempt.saturating_add(1);
            self.bus
                .publish(Self::event(EventKind::SessionJoining).with_attempt(attempt));

            let joined = select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.consumer.join(next_id) => res,
            };

            let failure: Option<SessionError> = match joined {
                Ok(session) => {
                    let id = session.id();
                    next_id = id.saturating_add(1);
                    self.sessions.fetch_add(1, Ordering::Relaxed);

                    let assignment = session
                        .assignment()
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(",");
                    self.bus.publish(
                        Self::event(EventKind::SessionJoined)
                            .with_session(id)
                            .with_attempt(attempt)
                            .with_reason(assignment),
                    );
                    attempt = 0;

                    let acked_before = self.offsets.total();
                    let runner = SessionRunner {
                        session,
                        handler: Arc::clone(&self.handler),
                        offsets: self.offsets.clone(),
                        bus: self.bus.clone(),
                        claim_queue: self.options.claim_queue,
                    };
                    let outcome = runner.run(&cancel).await;
                    let progressed = self.offsets.total() > acked_before;

                    match outcome {
                        SessionOutcome::Ended => {
                            self.bus.publish(
                                Self::event(EventKind::SessionEnded)
                                    .with_session(id)
                                    .with_reason("rebalance"),
                            );
                            backoff.reset();
                            None
                        }
                        SessionOutcome::Cancelled => {
                            self.bus.publish(
                                Self::event(EventKind::SessionEnded)
                                    .with_session(id)
                                    .with_reason("cancelled"),
                            );
                            None
                        }
                        SessionOutcome::Failed(e) => {
                            self.bus.publish(
                                Self::event(EventKind::SessionFailed)
                                    .with_session(id)
                                    .with_reason(e.to_string()),
                            );
                            if progressed {
                                backoff.reset();
                            }
                            Some(e)
                        }
                    }
                }
                Err(e) => {
                    self.bus.publish(
                        Self::event(EventKind::JoinFailed)
                            .with_attempt(attempt)
                            .with_reason(e.to_string()),
                    );
                    Some(e)
                }
            };

            if cancel.is_cancelled() {
                break;
            }
            if let Some(err) = failure {
                let delay = backoff.next_delay();
                self.bus.publish(
                    Self::event(EventKind::RejoinScheduled)
                        .with_attempt(backoff.failures())
                        .with_delay(delay)
                        .with_reason(err.to_string()),
                );

                let sleep = time::sleep(delay);
                tokio::pin!(sleep);
                select! {
                    _ = &mut sleep => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }

        self.consumer.close().await;
        self.bus.publish(Self::event(EventKind::ConsumerStopped));
    }
}
