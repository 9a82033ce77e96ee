//! # Record handlers.
//!
//! A [`RecordHandler`] processes one record at a time for a partition claim.
//! Returning `Ok(())` acknowledges the record (its offset is marked); returning
//! an error withholds the offset so the record is delivered again.
//!
//! ## Example
//! ```rust
//! use brokervisor::{HandlerError, HandlerFn, HandlerRef, Record};
//!
//! let handler: HandlerRef = HandlerFn::arc(|rec: Record| async move {
//!     if rec.payload.is_empty() {
//!         return Err(HandlerError::fail("empty payload"));
//!     }
//!     Ok(())
//! });
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::consumer::record::Record;
use crate::error::HandlerError;
use crate::events::{Bus, CONSUMER, Event, EventKind};
use crate::extract;

/// Shared handle to a record handler.
pub type HandlerRef = Arc<dyn RecordHandler>;

/// Processes records delivered by a partition claim.
///
/// Calls for one partition are sequential; calls for different partitions of
/// the same session may run concurrently, so implementations must be `Sync`.
#[async_trait]
pub trait RecordHandler: Send + Sync + 'static {
    async fn handle(&self, record: &Record) -> Result<(), HandlerError>;
}

/// Closure-backed handler.
///
/// The closure receives an owned [`Record`] (cheap to clone) so that it can
/// be moved into the returned future.
pub struct HandlerFn<F> {
    f: F,
}

impl<F, Fut> HandlerFn<F>
where
    F: Fn(Record) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps the closure and returns it as a [`HandlerRef`].
    pub fn arc(f: F) -> HandlerRef {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> RecordHandler for HandlerFn<F>
where
    F: Fn(Record) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, record: &Record) -> Result<(), HandlerError> {
        (self.f)(record.clone()).await
    }
}

/// Field names reported by [`FieldLogHandler`] when none are configured.
pub const DEFAULT_FIELDS: [&str; 5] = ["deviceId", "deviceName", "uuid", "oid", "icaoAddress"];

/// Handler that extracts named fields from JSON payloads and reports them as
/// [`EventKind::RecordDecoded`].
///
/// Never fails: unparseable payloads and missing fields yield empty values.
pub struct FieldLogHandler {
    bus: Bus,
    fields: Vec<String>,
}

impl FieldLogHandler {
    pub fn new(bus: Bus, fields: Vec<String>) -> Self {
        Self { bus, fields }
    }

    /// Uses [`DEFAULT_FIELDS`].
    pub fn with_default_fields(bus: Bus) -> Self {
        Self::new(bus, DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect())
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

#[async_trait]
impl RecordHandler for FieldLogHandler {
    async fn handle(&self, record: &Record) -> Result<(), HandlerError> {
        let values = extract::extract_fields(&record.payload, &self.fields);
        self.bus.publish(
            Event::new(EventKind::RecordDecoded)
                .with_component(CONSUMER)
                .with_topic(Arc::clone(&record.topic))
                .with_partition(record.partition)
                .with_offset(record.offset)
                .with_fields(values),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closure_handler_sees_the_record() {
        let handler = HandlerFn::arc(|rec: Record| async move {
            if rec.offset == 12 {
                Err(HandlerError::fail("poison"))
            } else {
                Ok(())
            }
        });
        assert!(handler.handle(&Record::new("events", 0, 11, "x")).await.is_ok());
        assert_eq!(
            handler.handle(&Record::new("events", 0, 12, "x")).await,
            Err(HandlerError::fail("poison"))
        );
    }

    #[tokio::test]
    async fn field_log_handler_publishes_decoded_fields() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let handler = FieldLogHandler::with_default_fields(bus);

        let payload = r#"{"deviceId":"d-1","deviceName":"probe","oid":7}"#;
        handler
            .handle(&Record::new("events", 2, 40, payload))
            .await
            .unwrap();

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::RecordDecoded);
        assert_eq!(ev.partition, Some(2));
        assert_eq!(ev.offset, Some(40));
        assert_eq!(ev.field("deviceId"), Some("d-1"));
        assert_eq!(ev.field("oid"), Some("7"));
        assert_eq!(ev.field("uuid"), Some(""));
    }

    #[tokio::test]
    async fn field_log_handler_accepts_garbage() {
        let handler = FieldLogHandler::new(Bus::new(1), vec!["deviceId".into()]);
        assert!(handler.handle(&Record::new("events", 0, 0, "not json")).await.is_ok());
    }
}
