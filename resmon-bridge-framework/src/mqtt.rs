//! MQTT implementation of the bus seam.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{Bus, BusConnector};
use crate::error::{BridgeError, Result};
use crate::MqttConfig;

/// Capacity of the request channel between the client and its event loop.
const REQUEST_CAPACITY: usize = 100;

/// Pause after an event-loop error before the next poll reconnects.
const EVENT_LOOP_RETRY: Duration = Duration::from_secs(1);

/// How long `disconnect` waits for the event loop to flush.
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// Build a client id: `<prefix>_<tag>_<8 hex>`.
pub fn client_id(prefix: &str, tag: &str) -> String {
    let short = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, tag, &short[..8])
}

/// Opens one MQTT connection per caller.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    config: MqttConfig,
}

impl MqttConnector {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BusConnector for MqttConnector {
    async fn connect(&self, client_tag: &str) -> Result<Arc<dyn Bus>> {
        let id = client_id(&self.config.client_id_prefix, client_tag);
        let mut options = MqttOptions::new(id.clone(), self.config.host.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        tokio::time::timeout(timeout, wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| {
                BridgeError::bus(format!(
                    "timed out connecting to {}:{}",
                    self.config.host, self.config.port
                ))
            })??;

        tracing::info!(client = %id, host = %self.config.host, port = self.config.port, "MQTT connection established");

        let cancel = CancellationToken::new();
        let driver = tokio::spawn(drive_event_loop(event_loop, cancel.clone(), id.clone()));

        Ok(Arc::new(MqttBus {
            client,
            client_id: id,
            cancel,
            driver: Mutex::new(Some(driver)),
        }))
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<()> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(BridgeError::bus(e.to_string())),
        }
    }
}

/// Keeps the connection alive and flushes queued publishes.
async fn drive_event_loop(mut event_loop: EventLoop, cancel: CancellationToken, client_id: String) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!(client = %client_id, "MQTT connection re-established");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(client = %client_id, error = %e, "MQTT event loop error");
                    tokio::time::sleep(EVENT_LOOP_RETRY).await;
                }
            }
        }
    }
    tracing::debug!(client = %client_id, "MQTT event loop stopped");
}

/// A live MQTT connection.
///
/// Publishes are queued without waiting for the broker (QoS 0), so a
/// disconnected broker surfaces as a full or closed request queue.
pub struct MqttBus {
    client: AsyncClient,
    client_id: String,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Bus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| BridgeError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    async fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(client = %self.client_id, error = %e, "MQTT disconnect request failed");
            self.cancel.cancel();
            return;
        }

        let driver = self.driver.lock().ok().and_then(|mut guard| guard.take());
        if let Some(driver) = driver {
            let _ = tokio::time::timeout(DISCONNECT_GRACE, driver).await;
        }
        self.cancel.cancel();
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
