//! Group identity, broker endpoints and client options.
//!
//! Both [`ConsumerGroupIdentity`] and [`BrokerEndpoints`] validate on
//! construction; a malformed value is a [`StartupError`] because the consumer
//! cannot do anything useful without them.

use std::fmt;

use serde::Deserialize;

use crate::error::StartupError;
use crate::policies::BackoffPolicy;

/// Consumer group name plus the topics the group consumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerGroupIdentity {
    group: String,
    topics: Vec<String>,
}

impl ConsumerGroupIdentity {
    /// Validates and builds an identity.
    ///
    /// The group must be non-blank and at least one non-blank topic is
    /// required. Duplicate topics are collapsed, keeping first-seen order.
    pub fn new<I, T>(group: impl Into<String>, topics: I) -> Result<Self, StartupError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let group = group.into();
        if group.trim().is_empty() {
            return Err(StartupError::InvalidIdentity {
                reason: "group name is empty".into(),
            });
        }

        let mut unique: Vec<String> = Vec::new();
        for topic in topics {
            let topic = topic.into();
            if topic.trim().is_empty() {
                return Err(StartupError::InvalidIdentity {
                    reason: format!("group {group:?} lists an empty topic name"),
                });
            }
            if !unique.contains(&topic) {
                unique.push(topic);
            }
        }
        if unique.is_empty() {
            return Err(StartupError::InvalidIdentity {
                reason: format!("group {group:?} has no topics"),
            });
        }

        Ok(Self {
            group,
            topics: unique,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}

impl fmt::Display for ConsumerGroupIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group={} topics=[{}]", self.group, self.topics.join(","))
    }
}

/// Non-empty list of `host:port` broker addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerEndpoints(Vec<String>);

impl BrokerEndpoints {
    pub fn new<I, T>(endpoints: I) -> Result<Self, StartupError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let list: Vec<String> = endpoints.into_iter().map(Into::into).collect();
        if list.is_empty() {
            return Err(StartupError::InvalidEndpoints {
                reason: "no broker endpoints configured".into(),
            });
        }
        for ep in &list {
            validate_host_port(ep)?;
        }
        Ok(Self(list))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Comma-joined form, as Kafka clients expect for `bootstrap.servers`.
    pub fn joined(&self) -> String {
        self.0.join(",")
    }
}

impl fmt::Display for BrokerEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

fn validate_host_port(ep: &str) -> Result<(), StartupError> {
    let invalid = |reason: &str| StartupError::InvalidEndpoints {
        reason: format!("{ep:?}: {reason}"),
    };
    let (host, port) = ep.rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
    if host.trim().is_empty() {
        return Err(invalid("empty host"));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid("port must be in 1..=65535")),
        Ok(_) => Ok(()),
    }
}

/// Where a group with no committed offset starts reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialOffset {
    #[default]
    Oldest,
    Newest,
}

/// Partition assignment strategy requested from the group coordinator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceStrategy {
    #[default]
    RoundRobin,
    Range,
}

impl RebalanceStrategy {
    /// Name used by Kafka's `partition.assignment.strategy`.
    pub fn as_kafka_name(&self) -> &'static str {
        match self {
            RebalanceStrategy::RoundRobin => "roundrobin",
            RebalanceStrategy::Range => "range",
        }
    }
}

/// Tunables of the consumer supervisor.
#[derive(Clone, Debug)]
pub struct ConsumerOptions {
    /// Delay policy between failed sessions or failed joins.
    pub rejoin: BackoffPolicy,
    /// Records buffered per partition claim before the session stops reading.
    pub claim_queue: usize,
    pub initial_offset: InitialOffset,
    pub rebalance: RebalanceStrategy,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            rejoin: BackoffPolicy::rejoin(),
            claim_queue: 256,
            initial_offset: InitialOffset::Oldest,
            rebalance: RebalanceStrategy::RoundRobin,
        }
    }
}
