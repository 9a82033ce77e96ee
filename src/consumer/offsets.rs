use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::consumer::record::TopicPartition;

/// Highest acknowledged offset per partition, shared across sessions.
///
/// Cloning shares the underlying state.
#[derive(Clone, Debug, Default)]
pub struct OffsetTracker {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    acked: Mutex<HashMap<TopicPartition, i64>>,
    total: AtomicU64,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an acknowledgement; keeps the maximum per partition.
    pub fn ack(&self, tp: &TopicPartition, offset: i64) {
        let mut acked = self.inner.acked.lock().unwrap_or_else(PoisonError::into_inner);
        acked
            .entry(tp.clone())
            .and_modify(|cur| *cur = (*cur).max(offset))
            .or_insert(offset);
        self.inner.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, tp: &TopicPartition) -> Option<i64> {
        self.inner
            .acked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tp)
            .copied()
    }

    /// Sorted copy of all partitions' highest acknowledged offsets.
    pub fn snapshot(&self) -> BTreeMap<TopicPartition, i64> {
        self.inner
            .acked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(tp, off)| (tp.clone(), *off))
            .collect()
    }

    /// Number of acknowledgements recorded so far (all partitions, all sessions).
    pub fn total(&self) -> u64 {
        self.inner.total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_highest_offset_per_partition() {
        let tracker = OffsetTracker::new();
        let p0 = TopicPartition::new("events", 0);
        let p1 = TopicPartition::new("events", 1);

        tracker.ack(&p0, 10);
        tracker.ack(&p0, 11);
        tracker.ack(&p0, 9);
        tracker.ack(&p1, 3);

        assert_eq!(tracker.get(&p0), Some(11));
        assert_eq!(tracker.get(&p1), Some(3));
        assert_eq!(tracker.total(), 4);
        assert_eq!(tracker.snapshot().len(), 2);
    }
}
