//! Modbus to MQTT bridge.
//!
//! Loads the bridge settings and the node list, launches every node and
//! runs until Ctrl+C.

use anyhow::{Context, Result};
use modbus_mqtt_bridge::{JsonFileStore, ModbusMqttConfig, NodeRegistry, TcpConnector};
use resmon_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, MqttConnector};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("modbus-mqtt.json5");

    let config = ModbusMqttConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let runner = BridgeRunner::new_with_args("modbus-mqtt-bridge", config, Some(&args))?;
    let config = runner.config();

    let nodes_file = args
        .nodes
        .clone()
        .unwrap_or_else(|| config.nodes_file.clone());
    let store = JsonFileStore::new(nodes_file);
    let nodes = store
        .load()
        .with_context(|| format!("Failed to load nodes from {:?}", store.path()))?;
    info!(nodes = nodes.len(), path = ?store.path(), "Loaded node list");

    let timing = config.timing;
    let connector = Arc::new(TcpConnector::new(
        timing.modbus_timeout(),
        timing.modbus_timeout(),
    ));
    let bus = Arc::new(MqttConnector::new(config.mqtt.clone()));

    let registry = Arc::new(
        NodeRegistry::new(nodes, connector, bus, config.topic.clone(), timing)
            .with_sink(Arc::new(store)),
    );
    registry.launch_all();

    runner
        .run_until_shutdown(|| async move { registry.shutdown().await })
        .await?;

    Ok(())
}
