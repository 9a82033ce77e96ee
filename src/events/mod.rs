//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the consumer supervisor, the pub/sub
//! supervisor, the orchestrator and subscriber workers.
//!
//! The bus is the crate's logging capability: components receive a [`Bus`]
//! handle at construction and never write to a global logger themselves.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`

mod bus;
mod event;

pub use bus::Bus;
pub use event::{CONSUMER, Event, EventKind, PUBSUB};
