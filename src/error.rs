//! Error types used by the supervisors, the orchestrator and record handlers.
//!
//! The taxonomy follows how far an error is allowed to travel:
//!
//! - [`StartupError`]: the consumer cannot be started. The only error that
//!   ends the process.
//! - [`SessionError`]: ends one consumer-group session; the supervisor rejoins.
//! - [`ConnectionError`]: ends one pub/sub connection (or attempt); the
//!   supervisor reconnects.
//! - [`HandlerError`]: a record handler rejected one record; its offset is
//!   withheld and it is redelivered on the next session.
//! - [`ConfigError`]: the configuration file is unreadable or invalid.
//! - [`RuntimeError`]: what [`Service::run`](crate::Service::run) returns.
//!
//! Every enum provides `as_label()` for stable snake_case labels in logs.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced by the orchestration runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The consumer could not be started.
    #[error("startup failed: {0}")]
    Startup(#[from] StartupError),

    /// Shutdown grace period was exceeded; some components did not stop in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Components still active when the grace period ran out.
        stuck: Vec<String>,
    },

    /// Registering OS signal handlers failed.
    #[error("cannot install shutdown signal handlers: {0}")]
    Signal(#[source] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use brokervisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Startup(_) => "runtime_startup_failed",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}

/// # Fatal errors raised while starting the consumer supervisor.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    /// Group name or topic list is empty or malformed.
    #[error("invalid consumer group identity: {reason}")]
    InvalidIdentity { reason: String },

    /// No broker endpoint was configured, or one is malformed.
    #[error("invalid broker endpoints: {reason}")]
    InvalidEndpoints { reason: String },

    /// The group client could not be created.
    #[error("cannot create consumer group client: {reason}")]
    Client { reason: String },

    /// None of the configured brokers could be reached.
    #[error("no broker reachable at {endpoints}: {reason}")]
    Unreachable { endpoints: String, reason: String },
}

impl StartupError {
    pub fn as_label(&self) -> &'static str {
        match self {
            StartupError::InvalidIdentity { .. } => "startup_invalid_identity",
            StartupError::InvalidEndpoints { .. } => "startup_invalid_endpoints",
            StartupError::Client { .. } => "startup_client",
            StartupError::Unreachable { .. } => "startup_unreachable",
        }
    }
}

/// # Recoverable errors that end one consumer-group session.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Joining the group (or being assigned partitions) failed.
    #[error("join failed: {reason}")]
    Join { reason: String },

    /// The broker or the network failed while the session was active.
    #[error("broker error: {reason}")]
    Broker { reason: String },

    /// Marking or committing an offset failed.
    #[error("commit of {topic}/{partition}@{offset} failed: {reason}")]
    Commit {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    /// The handler rejected a record; its offset was not acknowledged.
    #[error("handler rejected {topic}/{partition}@{offset}: {reason}")]
    HandlerFailed {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    /// The group client was closed underneath the session.
    #[error("consumer group client closed")]
    Closed,
}

impl SessionError {
    pub fn as_label(&self) -> &'static str {
        match self {
            SessionError::Join { .. } => "session_join",
            SessionError::Broker { .. } => "session_broker",
            SessionError::Commit { .. } => "session_commit",
            SessionError::HandlerFailed { .. } => "session_handler_failed",
            SessionError::Closed => "session_closed",
        }
    }
}

/// # Failure reported by a record handler.
///
/// Returning it withholds the record's offset; the record is delivered again
/// on the next session for its partition.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Processing failed and should be retried on redelivery.
    #[error("processing failed: {reason}")]
    Fail { reason: String },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Fail`].
    pub fn fail(reason: impl Into<String>) -> Self {
        HandlerError::Fail {
            reason: reason.into(),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Fail { .. } => "handler_failed",
        }
    }
}

/// # Recoverable pub/sub connection errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The broker refused the connection (bad credentials, protocol error, ...).
    #[error("connection refused: {reason}")]
    Refused { reason: String },

    /// Transport-level failure (DNS, TCP, TLS, I/O).
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// An established connection dropped.
    #[error("connection lost: {reason}")]
    Lost { reason: String },

    /// The broker rejected a subscription.
    #[error("subscribe to {filter:?} failed: {reason}")]
    Subscribe { filter: String, reason: String },

    /// Publishing a message failed.
    #[error("publish to {topic:?} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// No connection is currently established.
    #[error("not connected")]
    NotConnected,

    /// The handle reached its terminal `Closed` state.
    #[error("connection closed")]
    Closed,
}

impl ConnectionError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectionError::Refused { .. } => "connection_refused",
            ConnectionError::Transport { .. } => "connection_transport",
            ConnectionError::Lost { .. } => "connection_lost",
            ConnectionError::Subscribe { .. } => "connection_subscribe",
            ConnectionError::Publish { .. } => "connection_publish",
            ConnectionError::NotConnected => "connection_not_connected",
            ConnectionError::Closed => "connection_closed",
        }
    }
}

/// # Configuration loading and validation errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read config {path:?} failed: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config {path:?} failed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("logging setup failed: {reason}")]
    Logging { reason: String },
}

impl ConfigError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse { .. } => "config_parse",
            ConfigError::Invalid { .. } => "config_invalid",
            ConfigError::Logging { .. } => "config_logging",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_failure_message_names_the_record() {
        let err = SessionError::HandlerFailed {
            topic: "events".into(),
            partition: 0,
            offset: 12,
            reason: "bad payload".into(),
        };
        assert_eq!(err.to_string(), "handler rejected events/0@12: bad payload");
        assert_eq!(err.as_label(), "session_handler_failed");
    }

    #[test]
    fn startup_error_converts_into_runtime_error() {
        let err: RuntimeError = StartupError::Unreachable {
            endpoints: "k1:9092".into(),
            reason: "connection refused".into(),
        }
        .into();
        assert_eq!(err.as_label(), "runtime_startup_failed");
        assert!(err.to_string().contains("k1:9092"));
    }
}
