//! # Application configuration.
//!
//! [`AppConfig`] is loaded from a YAML file and converted into the typed
//! values the supervisors take.
//!
//! ```yaml
//! app_name: brokervisor
//! log:
//!   level: info            # overridden by RUST_LOG
//!   format: console        # console | json
//!   enable_caller: false
//!   file:                  # optional
//!     filename: logs/brokervisor.log
//!     max_size: 100        # MB before rotation
//!     max_backups: 5
//! kafka:
//!   brokers: ["localhost:9092"]
//!   group_id: g1
//!   topics: ["events"]
//!   initial_offset: oldest # oldest | newest
//!   rebalance_strategy: roundrobin
//!   rejoin:
//!     initial_ms: 100
//!     max_ms: 10000
//! mqtt:                    # optional
//!   broker: tcp://localhost:1883
//!   client_id: brokervisor
//!   username: svc
//!   connect_timeout_secs: 5
//!   max_reconnect_interval_secs: 180
//!   subscriptions:
//!     - { filter: "devices/+/status", qos: 1 }
//! fields: [deviceId, deviceName, uuid, oid, icaoAddress]
//! shutdown:
//!   grace_secs: 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::consumer::{
    BrokerEndpoints, ConsumerGroupIdentity, ConsumerOptions, DEFAULT_FIELDS, InitialOffset,
    RebalanceStrategy,
};
use crate::core::ServiceConfig;
use crate::error::ConfigError;
use crate::policies::{BackoffPolicy, JitterPolicy};
use crate::pubsub::{self, PubSubOptions, QoS};

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub log: LogConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    /// JSON fields reported for every consumed record.
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Console,
    Json,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// Include source file and line in every line.
    pub enable_caller: bool,
    pub file: Option<LogFileConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Console,
            enable_caller: false,
            file: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LogFileConfig {
    pub filename: PathBuf,
    /// Megabytes written before the file is rotated.
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// Rotated files kept next to the active one.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    /// Days a rotated file is kept; 0 keeps it until `max_backups` drops it.
    #[serde(default)]
    pub max_age: u64,
    /// Gzip rotated files.
    #[serde(default)]
    pub compress: bool,
}

impl LogFileConfig {
    pub fn max_age(&self) -> Option<Duration> {
        (self.max_age > 0).then(|| Duration::from_secs(self.max_age.saturating_mul(24 * 60 * 60)))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub group_id: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub initial_offset: InitialOffset,
    #[serde(default)]
    pub rebalance_strategy: RebalanceStrategy,
    #[serde(default = "default_claim_queue")]
    pub claim_queue: usize,
    #[serde(default)]
    pub rejoin: RejoinConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RejoinConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub jitter: JitterPolicy,
}

impl Default for RejoinConfig {
    fn default() -> Self {
        let policy = BackoffPolicy::rejoin();
        Self {
            initial_ms: policy.first.as_millis() as u64,
            max_ms: policy.max.as_millis() as u64,
            jitter: policy.jitter,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_reconnect_interval_secs")]
    pub max_reconnect_interval_secs: u64,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SubscriptionConfig {
    pub filter: String,
    #[serde(default)]
    pub qos: QoS,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 30 }
    }
}

fn default_app_name() -> String {
    "brokervisor".into()
}
fn default_fields() -> Vec<String> {
    DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect()
}
fn default_max_size() -> u64 {
    100
}
fn default_max_backups() -> usize {
    5
}
fn default_claim_queue() -> usize {
    256
}
fn default_client_id() -> String {
    "brokervisor".into()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_max_reconnect_interval_secs() -> u64 {
    180
}
fn default_keep_alive_secs() -> u64 {
    30
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl AppConfig {
    /// Reads, parses and validates the YAML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parses and validates YAML text; `origin` is only used in errors.
    pub fn parse(text: &str, origin: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let cfg: AppConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.as_ref().to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks every value the supervisors would otherwise reject at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.identity()?;
        self.endpoints()?;
        if self.kafka.claim_queue == 0 {
            return Err(invalid("kafka.claim_queue", "must be at least 1"));
        }
        if self.kafka.rejoin.max_ms == 0 {
            return Err(invalid("kafka.rejoin.max_ms", "must be at least 1"));
        }
        if self.kafka.rejoin.initial_ms > self.kafka.rejoin.max_ms {
            return Err(invalid("kafka.rejoin", "initial_ms exceeds max_ms"));
        }
        if self.log.level.trim().is_empty() {
            return Err(invalid("log.level", "must not be empty"));
        }
        if let Some(file) = &self.log.file {
            if file.filename.as_os_str().is_empty() {
                return Err(invalid("log.file.filename", "must not be empty"));
            }
            if file.max_size == 0 {
                return Err(invalid("log.file.max_size", "must be at least 1 MB"));
            }
        }
        if let Some(mqtt) = &self.mqtt {
            pubsub::split_broker_url(&mqtt.broker).map_err(|e| invalid("mqtt.broker", e))?;
            if mqtt.client_id.trim().is_empty() {
                return Err(invalid("mqtt.client_id", "must not be empty"));
            }
            if mqtt.connect_timeout_secs == 0 {
                return Err(invalid("mqtt.connect_timeout_secs", "must be at least 1"));
            }
            if mqtt.max_reconnect_interval_secs == 0 {
                return Err(invalid("mqtt.max_reconnect_interval_secs", "must be at least 1"));
            }
            for sub in &mqtt.subscriptions {
                pubsub::validate_filter(&sub.filter)
                    .map_err(|e| invalid("mqtt.subscriptions", e))?;
            }
        }
        Ok(())
    }

    pub fn identity(&self) -> Result<ConsumerGroupIdentity, ConfigError> {
        ConsumerGroupIdentity::new(self.kafka.group_id.clone(), self.kafka.topics.iter().cloned())
            .map_err(|e| invalid("kafka", e.to_string()))
    }

    pub fn endpoints(&self) -> Result<BrokerEndpoints, ConfigError> {
        BrokerEndpoints::new(self.kafka.brokers.iter().cloned())
            .map_err(|e| invalid("kafka.brokers", e.to_string()))
    }

    pub fn consumer_options(&self) -> ConsumerOptions {
        let rejoin = &self.kafka.rejoin;
        ConsumerOptions {
            rejoin: BackoffPolicy {
                first: Duration::from_millis(rejoin.initial_ms),
                max: Duration::from_millis(rejoin.max_ms),
                factor: 2.0,
                jitter: rejoin.jitter,
            },
            claim_queue: self.kafka.claim_queue,
            initial_offset: self.kafka.initial_offset,
            rebalance: self.kafka.rebalance_strategy,
        }
    }

    /// `None` when no `mqtt` section is configured.
    pub fn pubsub_options(&self) -> Option<PubSubOptions> {
        let mqtt = self.mqtt.as_ref()?;
        let mut opts = PubSubOptions::new(mqtt.broker.clone(), mqtt.client_id.clone());
        if let Some(username) = &mqtt.username {
            opts = opts.with_credentials(username.clone(), mqtt.password.clone().unwrap_or_default());
        }
        opts.connect_timeout = Duration::from_secs(mqtt.connect_timeout_secs);
        opts.reconnect =
            BackoffPolicy::reconnect(Duration::from_secs(mqtt.max_reconnect_interval_secs));
        opts.keep_alive = Duration::from_secs(mqtt.keep_alive_secs);
        Some(opts)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            grace: Duration::from_secs(self.shutdown.grace_secs),
            ..ServiceConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const MINIMAL: &str = r#"
kafka:
  brokers: ["k1:9092", "k2:9092"]
  group_id: g1
  topics: [events]
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = AppConfig::parse(MINIMAL, "inline").unwrap();
        assert_eq!(cfg.app_name, "brokervisor");
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.log.format, LogFormat::Console);
        assert!(cfg.mqtt.is_none());
        assert_eq!(cfg.fields, DEFAULT_FIELDS);
        assert_eq!(cfg.identity().unwrap().group(), "g1");
        assert_eq!(cfg.endpoints().unwrap().joined(), "k1:9092,k2:9092");
        assert_eq!(cfg.consumer_options().rejoin, BackoffPolicy::rejoin());
        assert_eq!(cfg.service_config().grace, Duration::from_secs(30));
        assert!(cfg.pubsub_options().is_none());
    }

    #[test]
    fn full_config_converts() {
        let text = r#"
app_name: edge
log:
  level: debug
  format: json
  enable_caller: true
  file: { filename: /tmp/edge.log, max_size: 10, max_age: 7, compress: true }
kafka:
  brokers: ["k1:9092"]
  group_id: g1
  topics: [events, audit]
  initial_offset: newest
  rebalance_strategy: range
  rejoin: { initial_ms: 50, max_ms: 2000 }
mqtt:
  broker: tcp://mq:1883
  username: svc
  password: secret
  max_reconnect_interval_secs: 60
  subscriptions:
    - filter: devices/+/status
      qos: 1
fields: [deviceId]
shutdown: { grace_secs: 5 }
"#;
        let cfg = AppConfig::parse(text, "inline").unwrap();
        assert_eq!(cfg.log.format, LogFormat::Json);
        let file = cfg.log.file.as_ref().unwrap();
        assert_eq!(file.max_backups, 5);
        assert_eq!(file.max_age(), Some(Duration::from_secs(7 * 24 * 60 * 60)));
        assert!(file.compress);

        let opts = cfg.consumer_options();
        assert_eq!(opts.initial_offset, InitialOffset::Newest);
        assert_eq!(opts.rebalance, RebalanceStrategy::Range);
        assert_eq!(opts.rejoin.first, Duration::from_millis(50));

        let mqtt = cfg.pubsub_options().unwrap();
        assert_eq!(mqtt.connect_timeout, Duration::from_secs(5));
        assert_eq!(mqtt.reconnect.max, Duration::from_secs(60));
        assert_eq!(mqtt.credentials.unwrap().username, "svc");
        assert_eq!(
            cfg.mqtt.unwrap().subscriptions[0],
            SubscriptionConfig {
                filter: "devices/+/status".into(),
                qos: QoS::AtLeastOnce
            }
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let no_topics = MINIMAL.replace("topics: [events]", "topics: []");
        assert!(matches!(
            AppConfig::parse(&no_topics, "inline"),
            Err(ConfigError::Invalid { field: "kafka", .. })
        ));

        let bad_broker = format!("{MINIMAL}mqtt: {{ broker: \"ws://mq:80\" }}\n");
        assert!(matches!(
            AppConfig::parse(&bad_broker, "inline"),
            Err(ConfigError::Invalid { field: "mqtt.broker", .. })
        ));

        let bad_qos = format!(
            "{MINIMAL}mqtt:\n  broker: tcp://mq\n  subscriptions: [{{ filter: a, qos: 3 }}]\n"
        );
        assert!(matches!(
            AppConfig::parse(&bad_qos, "inline"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn log_file_retention_defaults_keep_everything() {
        let text = format!("{MINIMAL}log: {{ file: {{ filename: app.log }} }}\n");
        let cfg = AppConfig::parse(&text, "inline").unwrap();
        let file = cfg.log.file.unwrap();
        assert_eq!(file.max_age(), None);
        assert!(!file.compress);
    }

    #[test]
    fn rejects_zero_rejoin_ceiling() {
        let busy = format!("{MINIMAL}  rejoin: {{ initial_ms: 0, max_ms: 0 }}\n");
        assert!(matches!(
            AppConfig::parse(&busy, "inline"),
            Err(ConfigError::Invalid { field: "kafka.rejoin.max_ms", .. })
        ));

        let ok = format!("{MINIMAL}  rejoin: {{ initial_ms: 0, max_ms: 1 }}\n");
        assert!(AppConfig::parse(&ok, "inline").is_ok());
    }

    #[test]
    fn load_reports_missing_file_and_reads_real_one() {
        assert!(matches!(
            AppConfig::load("/definitely/not/here.yaml"),
            Err(ConfigError::Read { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let cfg = AppConfig::load(file.path()).unwrap();
        assert_eq!(cfg.kafka.topics, ["events"]);
    }
}
