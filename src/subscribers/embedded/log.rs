//! # LogWriter: renders runtime events through `tracing`.
//!
//! Levels:
//! - `debug`: per-record progress, claims, join/connect attempts, resubscriptions
//! - `info`: sessions joined/ended, connection established/closed, decoded fields, shutdown
//! - `warn`: recoverable failures and scheduled retries
//! - `error`: lost connections, fatal startup, grace exceeded, subscriber panics
//!
//! ## Example output (console format)
//! ```text
//! INFO  session joined component="consumer" session=3 attempt=4 assignment="events/0,events/1"
//! DEBUG record received component="consumer" session=3 topic="events" partition=0 offset=10 bytes=87
//! INFO  record decoded topic="events" partition=0 offset=10 deviceId=d-1 deviceName=probe uuid= oid= icaoAddress=
//! ERROR connection lost component="pubsub" session=2 cause="connection reset by peer"
//! WARN  reconnect scheduled component="pubsub" attempt=1 delay_ms=1000
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event subscriber that forwards every event to `tracing`.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn s(v: &Option<std::sync::Arc<str>>) -> &str {
    v.as_deref().unwrap_or("")
}

fn render_fields(e: &Event) -> String {
    e.fields
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let component = s(&e.component);
        match e.kind {
            // consumer
            EventKind::ConsumerStarted => {
                info!(component, detail = s(&e.reason), "consumer group started");
            }
            EventKind::StartupFailed => {
                error!(component, error = s(&e.reason), "consumer startup failed");
            }
            EventKind::SessionJoining => {
                debug!(component, attempt = e.attempt, "joining consumer group");
            }
            EventKind::SessionJoined => {
                info!(
                    component,
                    session = e.session,
                    attempt = e.attempt,
                    assignment = s(&e.reason),
                    "session joined"
                );
            }
            EventKind::JoinFailed => {
                warn!(component, attempt = e.attempt, error = s(&e.reason), "join failed");
            }
            EventKind::SessionEnded => {
                info!(component, session = e.session, reason = s(&e.reason), "session ended");
            }
            EventKind::SessionFailed => {
                warn!(component, session = e.session, error = s(&e.reason), "session failed");
            }
            EventKind::RejoinScheduled => {
                warn!(
                    component,
                    attempt = e.attempt,
                    delay_ms = e.delay_ms,
                    error = s(&e.reason),
                    "rejoin scheduled"
                );
            }
            EventKind::ClaimStarted => {
                debug!(
                    component,
                    session = e.session,
                    topic = s(&e.topic),
                    partition = e.partition,
                    "claim started"
                );
            }
            EventKind::ClaimStopped => {
                debug!(
                    component,
                    session = e.session,
                    topic = s(&e.topic),
                    partition = e.partition,
                    last_acked = e.offset,
                    "claim stopped"
                );
            }
            EventKind::RecordReceived => {
                debug!(
                    component,
                    session = e.session,
                    topic = s(&e.topic),
                    partition = e.partition,
                    offset = e.offset,
                    bytes = e.bytes,
                    "record received"
                );
            }
            EventKind::RecordAcked => {
                debug!(
                    component,
                    topic = s(&e.topic),
                    partition = e.partition,
                    offset = e.offset,
                    "record acked"
                );
            }
            EventKind::RecordRejected => {
                warn!(
                    component,
                    session = e.session,
                    topic = s(&e.topic),
                    partition = e.partition,
                    offset = e.offset,
                    error = s(&e.reason),
                    "record rejected by handler"
                );
            }
            EventKind::RecordDecoded => {
                info!(
                    topic = s(&e.topic),
                    partition = e.partition,
                    offset = e.offset,
                    fields = %render_fields(e),
                    "record decoded"
                );
            }
            EventKind::ConsumerStopped => {
                info!(component, "consumer group stopped");
            }

            // pub/sub
            EventKind::Connecting => {
                debug!(component, attempt = e.attempt, endpoint = s(&e.reason), "connecting");
            }
            EventKind::Connected => {
                info!(component, session = e.session, endpoint = s(&e.reason), "connected");
            }
            EventKind::ConnectFailed => {
                warn!(component, attempt = e.attempt, error = s(&e.reason), "connect failed");
            }
            EventKind::ConnectTimedOut => {
                warn!(
                    component,
                    timeout_ms = e.timeout_ms,
                    "first connection not established in time; retrying in background"
                );
            }
            EventKind::ConnectionLost => {
                error!(component, session = e.session, cause = s(&e.reason), "connection lost");
            }
            EventKind::ReconnectScheduled => {
                warn!(component, attempt = e.attempt, delay_ms = e.delay_ms, "reconnect scheduled");
            }
            EventKind::Resubscribed => {
                debug!(component, session = e.session, filter = s(&e.topic), "subscribed");
            }
            EventKind::SubscribeFailed => {
                warn!(
                    component,
                    session = e.session,
                    filter = s(&e.topic),
                    error = s(&e.reason),
                    "subscribe failed"
                );
            }
            EventKind::ConnectionClosed => {
                info!(component, "connection closed");
            }

            // orchestrator
            EventKind::ShutdownRequested => {
                info!("shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                info!("all components stopped within grace period");
            }
            EventKind::GraceExceeded => {
                error!(stuck = s(&e.reason), "grace period exceeded");
            }

            // subscribers
            EventKind::SubscriberOverflow => {
                warn!(subscriber = component, reason = s(&e.reason), "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                error!(subscriber = component, info = s(&e.reason), "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }

    fn queue_capacity(&self) -> usize {
        4096
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_render_as_key_value_pairs() {
        let ev = Event::new(EventKind::RecordDecoded).with_fields(vec![
            ("deviceId".into(), "d-1".into()),
            ("oid".into(), String::new()),
        ]);
        assert_eq!(render_fields(&ev), "deviceId=d-1 oid=");
    }

    #[tokio::test]
    async fn handles_every_kind_without_a_subscriber_installed() {
        let writer = LogWriter::new();
        for kind in [
            EventKind::SessionJoined,
            EventKind::ConnectionLost,
            EventKind::RecordDecoded,
            EventKind::GraceExceeded,
        ] {
            writer.on_event(&Event::new(kind)).await;
        }
    }
}
