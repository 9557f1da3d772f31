//! Configuration for the Modbus/MQTT bridge.
//!
//! Two documents are involved: the bridge settings (JSON5, read once at
//! startup) and the node list (plain JSON, rewritten whenever a node is
//! added, edited or removed).

use resmon_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig, MqttConfig};
use resmon_common::DEFAULT_TOPIC;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Largest register span a single holding-register read may request.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access node file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse node file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Nodes keyed by node id, in id order.
pub type NodeMap = BTreeMap<String, NodeConfig>;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusMqttConfig {
    /// MQTT broker settings
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Topic every node publishes to
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Path of the persisted node list
    #[serde(default = "default_nodes_file")]
    pub nodes_file: PathBuf,

    /// Field-bus and publish timing budgets
    #[serde(default)]
    pub timing: TimingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_nodes_file() -> PathBuf {
    PathBuf::from("nodes_config.json")
}

impl Default for ModbusMqttConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            topic: default_topic(),
            nodes_file: default_nodes_file(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BridgeConfig for ModbusMqttConfig {
    fn mqtt(&self) -> &MqttConfig {
        &self.mqtt
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn validate(&self) -> Result<(), BridgeError> {
        if self.topic.is_empty() {
            return Err(BridgeError::validation("topic cannot be empty"));
        }
        if self.mqtt.host.is_empty() {
            return Err(BridgeError::validation("mqtt.host cannot be empty"));
        }
        self.timing
            .validate()
            .map_err(|e| BridgeError::validation(e.to_string()))
    }
}

/// Timing budgets, all in milliseconds.
///
/// The field bus behind the TCP gateway is a slow serial line; the
/// inter-sensor and poll budgets keep the devices from reporting errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Minimum time per sensor read, measured from the start of the read
    #[serde(default = "default_inter_sensor_delay_ms")]
    pub inter_sensor_delay_ms: u64,

    /// Minimum time between the starts of two poll cycles
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Connect and per-read timeout
    #[serde(default = "default_modbus_timeout_ms")]
    pub modbus_timeout_ms: u64,

    /// Constant delay between failed connection attempts
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Pause after each publish cycle
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,

    /// Pause after every published message
    #[serde(default = "default_inter_message_delay_ms")]
    pub inter_message_delay_ms: u64,

    /// Delay before retrying a failed bus connection or publish cycle
    #[serde(default = "default_publish_retry_delay_ms")]
    pub publish_retry_delay_ms: u64,

    /// How long `stop` waits for a node's workers to exit
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_inter_sensor_delay_ms() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_modbus_timeout_ms() -> u64 {
    3000
}

fn default_reconnect_delay_ms() -> u64 {
    4000
}

fn default_publish_interval_ms() -> u64 {
    5000
}

fn default_inter_message_delay_ms() -> u64 {
    100
}

fn default_publish_retry_delay_ms() -> u64 {
    5000
}

fn default_stop_timeout_ms() -> u64 {
    1000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            inter_sensor_delay_ms: default_inter_sensor_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            modbus_timeout_ms: default_modbus_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            publish_interval_ms: default_publish_interval_ms(),
            inter_message_delay_ms: default_inter_message_delay_ms(),
            publish_retry_delay_ms: default_publish_retry_delay_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl TimingConfig {
    pub fn inter_sensor_delay(&self) -> Duration {
        Duration::from_millis(self.inter_sensor_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn modbus_timeout(&self) -> Duration {
        Duration::from_millis(self.modbus_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn inter_message_delay(&self) -> Duration {
        Duration::from_millis(self.inter_message_delay_ms)
    }

    pub fn publish_retry_delay(&self) -> Duration {
        Duration::from_millis(self.publish_retry_delay_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Reject budgets that would make a loop spin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modbus_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timing.modbus_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "timing.reconnect_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.publish_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "timing.publish_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.publish_retry_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "timing.publish_retry_delay_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a single node (one TCP gateway in front of a field bus).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Gateway address
    pub ip: String,

    /// Gateway TCP port; accepts a number or a numeric string
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: u16,

    /// Human-readable site label
    #[serde(default)]
    pub site: String,

    /// Sensors polled in this order
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

fn port_from_number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid port '{}'", text))),
    }
}

impl NodeConfig {
    /// Validate a node before it is added or launched.
    pub fn validate(&self, node_id: &str) -> Result<(), ConfigError> {
        if node_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Node ID cannot be empty".to_string(),
            ));
        }

        if self.ip.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "Node '{}': IP address is required",
                node_id
            )));
        }

        if self.sensors.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Node '{}': at least one sensor is required",
                node_id
            )));
        }

        let mut names = HashSet::new();
        for sensor in &self.sensors {
            sensor.validate(node_id)?;
            if !names.insert(sensor.name()) {
                return Err(ConfigError::Validation(format!(
                    "Node '{}': duplicate sensor name '{}'",
                    node_id,
                    sensor.name()
                )));
            }
        }

        Ok(())
    }

    /// `ip:port` of the gateway.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// A sensor on a node's field bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SensorConfig {
    /// Single-register integer reading ("RES" resistance sensors).
    #[serde(rename = "RES")]
    Direct {
        name: String,
        slave_id: u8,
        address: u16,
        #[serde(default = "default_count")]
        count: u16,
    },
    /// Word-swapped float inside a larger register span ("NER" sensors).
    #[serde(rename = "NER")]
    CompositeFloat {
        name: String,
        slave_id: u8,
        start_address: u16,
        register_count: u16,
        /// Index in the span where the two value registers begin
        #[serde(rename = "ner_position", default = "default_ner_position")]
        offset: u16,
    },
}

fn default_count() -> u16 {
    1
}

fn default_ner_position() -> u16 {
    2
}

impl SensorConfig {
    pub fn name(&self) -> &str {
        match self {
            SensorConfig::Direct { name, .. } | SensorConfig::CompositeFloat { name, .. } => name,
        }
    }

    pub fn slave_id(&self) -> u8 {
        match self {
            SensorConfig::Direct { slave_id, .. }
            | SensorConfig::CompositeFloat { slave_id, .. } => *slave_id,
        }
    }

    /// Start address and register count of the holding-register read.
    pub fn read_span(&self) -> (u16, u16) {
        match self {
            SensorConfig::Direct { address, count, .. } => (*address, *count),
            SensorConfig::CompositeFloat {
                start_address,
                register_count,
                ..
            } => (*start_address, *register_count),
        }
    }

    /// Short variant tag as stored in the node file.
    pub fn kind(&self) -> &'static str {
        match self {
            SensorConfig::Direct { .. } => "RES",
            SensorConfig::CompositeFloat { .. } => "NER",
        }
    }

    fn validate(&self, node_id: &str) -> Result<(), ConfigError> {
        if self.name().trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "Node '{}': sensor name cannot be empty",
                node_id
            )));
        }

        let (_, count) = self.read_span();
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(ConfigError::Validation(format!(
                "Node '{}': sensor '{}' must read 1-{} registers",
                node_id,
                self.name(),
                MAX_READ_REGISTERS
            )));
        }

        Ok(())
    }
}

/// Persistence hook called whenever the node list changes.
pub trait ConfigSink: Send + Sync {
    fn save(&self, nodes: &NodeMap) -> Result<(), ConfigError>;
}

/// Node list stored as a pretty-printed JSON object keyed by node id.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the node list; a missing file is an empty list.
    pub fn load(&self) -> Result<NodeMap, ConfigError> {
        if !self.path.exists() {
            return Ok(NodeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let nodes: NodeMap = serde_json::from_str(&content)?;
        Ok(nodes)
    }
}

impl ConfigSink for JsonFileStore {
    fn save(&self, nodes: &NodeMap) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(nodes)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
