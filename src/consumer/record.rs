use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// A topic and one of its partitions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: Arc<str>,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<Arc<str>>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// One immutable unit read from a partition.
///
/// Offsets strictly increase within a partition. Cloning is cheap: the topic
/// is shared and payload/key are reference-counted [`Bytes`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub topic: Arc<str>,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

impl Record {
    pub fn new(
        topic: impl Into<Arc<str>>,
        partition: i32,
        offset: i64,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: payload.into(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// The partition this record belongs to.
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition {
            topic: Arc::clone(&self.topic),
            partition: self.partition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_partition_display() {
        let rec = Record::new("events", 3, 42, &b"{}"[..]);
        assert_eq!(rec.topic_partition().to_string(), "events/3");
    }

    #[test]
    fn topic_partitions_order_by_topic_then_partition() {
        let mut tps = vec![
            TopicPartition::new("b", 0),
            TopicPartition::new("a", 1),
            TopicPartition::new("a", 0),
        ];
        tps.sort();
        assert_eq!(
            tps.iter().map(ToString::to_string).collect::<Vec<_>>(),
            ["a/0", "a/1", "b/0"]
        );
    }
}
