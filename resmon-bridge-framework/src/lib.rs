//! Resmon Bridge Framework
//!
//! Common abstractions for bridges that publish field telemetry to MQTT.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`Bus`] / [`BusConnector`] seams with an MQTT implementation ([`MqttConnector`])
//! - [`Publisher`] for publishing enveloped bus messages in order
//! - [`BridgeArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use resmon_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("bridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
//!     let workers = start_workers(runner.config());
//!     runner.run_until_shutdown(|| async move { workers.stop().await }).await?;
//!     Ok(())
//! }
//! ```

mod args;
mod bus;
mod config;
mod error;
mod mqtt;
mod publisher;
mod runner;

pub use args::BridgeArgs;
pub use bus::{Bus, BusConnector};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use mqtt::{MqttBus, MqttConnector, client_id};
pub use publisher::{PublishStats, Publisher};
pub use runner::BridgeRunner;

// Re-export commonly used types from resmon-common
pub use resmon_common::{BusMessage, LoggingConfig, MqttConfig, SensorValue};
