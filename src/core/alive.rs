//! # Component lifecycle tracker with sequence-based ordering.
//!
//! Tracks which supervisors are still running, so that a shutdown exceeding
//! the grace period can name the stuck ones.
//!
//! ## Architecture
//! ```text
//! supervisors ──► Bus ──► listener ──► AliveTracker::update()
//!                                             │
//!                                             ▼
//!                                 HashMap<component, {seq, alive}>
//! ```
//!
//! ## Rules
//! - `ConsumerStarted` / `Connecting` mark a component alive.
//! - `ConsumerStopped` / `ConnectionClosed` mark it stopped.
//! - Events with `seq <= last_seq` for the component are rejected (stale).
//! - Reads are eventually consistent with the bus.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::events::{Event, EventKind};

#[derive(Debug, Clone)]
struct ComponentState {
    last_seq: u64,
    alive: bool,
}

/// Thread-safe tracker of running components.
#[derive(Default)]
pub struct AliveTracker {
    state: RwLock<HashMap<String, ComponentState>>,
}

impl AliveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `ev` if it is newer than the last event seen for its component.
    ///
    /// Returns `true` when the alive flag was set by this event.
    pub async fn update(&self, ev: &Event) -> bool {
        let alive = match ev.kind {
            EventKind::ConsumerStarted | EventKind::Connecting => true,
            EventKind::ConsumerStopped | EventKind::ConnectionClosed => false,
            _ => return false,
        };
        let Some(name) = ev.component.as_deref() else {
            return false;
        };

        let mut state = self.state.write().await;
        let entry = state.entry(name.to_string()).or_insert(ComponentState {
            last_seq: 0,
            alive: false,
        });
        if ev.seq <= entry.last_seq {
            return false;
        }
        entry.last_seq = ev.seq;
        entry.alive = alive;
        true
    }

    /// Sorted names of the components currently alive.
    pub async fn snapshot(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut alive: Vec<String> = state
            .iter()
            .filter(|(_, cs)| cs.alive)
            .map(|(name, _)| name.clone())
            .collect();
        alive.sort_unstable();
        alive
    }

    pub async fn is_alive(&self, name: &str) -> bool {
        self.state
            .read()
            .await
            .get(name)
            .is_some_and(|cs| cs.alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CONSUMER, PUBSUB};

    #[tokio::test]
    async fn tracks_start_and_stop_per_component() {
        let tracker = AliveTracker::new();
        let started = Event::new(EventKind::ConsumerStarted).with_component(CONSUMER);
        let connecting = Event::new(EventKind::Connecting).with_component(PUBSUB);
        let stopped = Event::new(EventKind::ConsumerStopped).with_component(CONSUMER);

        assert!(tracker.update(&started).await);
        assert!(tracker.update(&connecting).await);
        assert_eq!(tracker.snapshot().await, vec!["consumer", "pubsub"]);

        assert!(tracker.update(&stopped).await);
        assert_eq!(tracker.snapshot().await, vec!["pubsub"]);
        assert!(!tracker.is_alive(CONSUMER).await);
    }

    #[tokio::test]
    async fn rejects_stale_events() {
        let tracker = AliveTracker::new();
        let started = Event::new(EventKind::ConsumerStarted).with_component(CONSUMER);
        let stopped = Event::new(EventKind::ConsumerStopped).with_component(CONSUMER);

        assert!(tracker.update(&stopped).await);
        assert!(!tracker.update(&started).await);
        assert!(!tracker.is_alive(CONSUMER).await);
    }
}
