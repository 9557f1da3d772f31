//! Modbus to MQTT bridge for resistance-monitor nodes.
//!
//! Each node is a Modbus TCP gateway in front of a serial field bus. A node
//! runs two tasks: a poller that reads every sensor in order and records the
//! result in the node's state slice, and a publisher that republishes the
//! last known values to MQTT on its own cadence.
//!
//! # Wire format
//!
//! ```text
//! {"Node_Id": "<node id>", "data": base64(<inner json>)}
//! ```
//!
//! One publish cycle sends `{"initialStart":1}`, then
//! `{"<sensor>":<value>,"alarm":0,"start":1}` per sensor, then `{"end":1}`.

pub mod config;
pub mod decode;
pub mod frame;
pub mod poller;
pub mod provision;
pub mod registry;
pub mod state;
pub mod telemetry;
pub mod transport;

pub use config::{
    ConfigError, ConfigSink, JsonFileStore, ModbusMqttConfig, NodeConfig, NodeMap, SensorConfig,
    TimingConfig,
};
pub use registry::{NodeRegistry, NodeStatus, RegistryError};
pub use state::{LinkState, LogEntry, LogLevel, ReadingStatus, SensorReading};
pub use transport::{Connector, ModbusTransport, PollError, TcpConnector};
