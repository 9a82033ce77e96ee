//! # Subscription registry.
//!
//! [`SubscriptionSet`] is the single source of truth for what the connection
//! should be subscribed to. It outlives individual connections.
//!
//! Each entry remembers the connection epoch it was last applied to.
//! [`SubscriptionSet::pending_for`] hands out entries not yet applied to an
//! epoch and stamps them in the same critical section, so every filter is
//! subscribed at most once per connection even when a user `subscribe` races
//! with the reconnect hook. A failed `subscribe` releases the stamp so the
//! entry is handed out again for the same epoch.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::pubsub::topic::{self, QoS};

/// An inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub topic: Arc<str>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<Arc<str>>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }
}

/// Callback invoked for every message matching a subscription.
///
/// Runs on the connection driver; keep it short and hand heavy work off to
/// a channel or task.
pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;

struct Entry {
    qos: QoS,
    callback: MessageCallback,
    applied_epoch: u64,
}

/// Registry of topic filters and their callbacks. Clones share state.
#[derive(Clone, Default)]
pub struct SubscriptionSet {
    entries: Arc<Mutex<BTreeMap<String, Entry>>>,
}

impl fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSet")
            .field("filters", &self.filters())
            .finish()
    }
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces the subscription for `filter`.
    ///
    /// A replaced entry is applied again on the current connection so a
    /// changed QoS takes effect.
    pub fn insert(
        &self,
        filter: impl Into<String>,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), String> {
        let filter = filter.into();
        topic::validate_filter(&filter)?;
        self.lock().insert(
            filter,
            Entry {
                qos,
                callback,
                applied_epoch: 0,
            },
        );
        Ok(())
    }

    /// Removes `filter`; returns whether it was present.
    pub fn remove(&self, filter: &str) -> bool {
        self.lock().remove(filter).is_some()
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.lock().contains_key(filter)
    }

    /// Registered filters in lexical order.
    pub fn filters(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Entries not yet applied to connection `epoch`, stamped as applied.
    pub(crate) fn pending_for(&self, epoch: u64) -> Vec<(String, QoS)> {
        self.lock()
            .iter_mut()
            .filter(|(_, e)| e.applied_epoch < epoch)
            .map(|(filter, e)| {
                e.applied_epoch = epoch;
                (filter.clone(), e.qos)
            })
            .collect()
    }

    /// Undoes the stamp `pending_for(epoch)` put on `filter`.
    pub(crate) fn release(&self, filter: &str, epoch: u64) {
        if let Some(entry) = self.lock().get_mut(filter) {
            if entry.applied_epoch == epoch {
                entry.applied_epoch = 0;
            }
        }
    }

    /// Invokes the callbacks of every filter matching `msg.topic`.
    ///
    /// Callbacks run outside the registry lock. Returns how many ran.
    pub fn dispatch(&self, msg: &Message) -> usize {
        let callbacks: Vec<MessageCallback> = self
            .lock()
            .iter()
            .filter(|(filter, _)| topic::matches(filter, &msg.topic))
            .map(|(_, e)| Arc::clone(&e.callback))
            .collect();
        for cb in &callbacks {
            cb(msg);
        }
        callbacks.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn noop() -> MessageCallback {
        Arc::new(|_: &Message| {})
    }

    #[test]
    fn pending_entries_are_handed_out_once_per_epoch() {
        let set = SubscriptionSet::new();
        set.insert("a/#", QoS::AtLeastOnce, noop()).unwrap();
        set.insert("b/+", QoS::AtMostOnce, noop()).unwrap();

        assert_eq!(set.pending_for(1).len(), 2);
        assert!(set.pending_for(1).is_empty());

        set.insert("c", QoS::AtMostOnce, noop()).unwrap();
        assert_eq!(set.pending_for(1), vec![("c".to_string(), QoS::AtMostOnce)]);

        assert_eq!(set.pending_for(2).len(), 3);
    }

    #[test]
    fn released_entry_is_handed_out_again() {
        let set = SubscriptionSet::new();
        set.insert("a", QoS::AtLeastOnce, noop()).unwrap();
        set.insert("b", QoS::AtMostOnce, noop()).unwrap();
        assert_eq!(set.pending_for(3).len(), 2);

        set.release("a", 3);
        set.release("b", 2);
        assert_eq!(set.pending_for(3), vec![("a".to_string(), QoS::AtLeastOnce)]);
        assert!(set.pending_for(3).is_empty());
    }

    #[test]
    fn dispatch_runs_matching_callbacks() {
        let hits = Arc::new(AtomicUsize::new(0));
        let set = SubscriptionSet::new();
        let counter = Arc::clone(&hits);
        set.insert(
            "sensors/+/temp",
            QoS::AtMostOnce,
            Arc::new(move |_: &Message| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        set.insert("other", QoS::AtMostOnce, noop()).unwrap();

        assert_eq!(set.dispatch(&Message::new("sensors/a1/temp", "21.5")), 1);
        assert_eq!(set.dispatch(&Message::new("sensors/a1/hum", "40")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejects_malformed_filters() {
        let set = SubscriptionSet::new();
        assert!(set.insert("a/#/b", QoS::AtMostOnce, noop()).is_err());
        assert!(set.is_empty());
    }
}
