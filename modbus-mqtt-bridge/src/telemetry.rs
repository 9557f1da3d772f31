//! Per-node telemetry publisher.
//!
//! Republishes the node's last known values on a fixed cadence, whatever
//! their status. It never talks to the poller; it only reads the state slice.

use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use resmon_bridge_framework::{BusConnector, BusMessage, Publisher};

use crate::config::TimingConfig;
use crate::poller::sleep_until_or_cancel;
use crate::state::NodeState;

/// Short label of a message for log lines.
fn describe(message: &BusMessage) -> &str {
    match message {
        BusMessage::InitialStart => "initialStart",
        BusMessage::Reading { sensor, .. } => sensor.as_str(),
        BusMessage::End => "end",
    }
}

/// Publisher task for a single node.
pub struct TelemetryPublisher {
    node_id: String,
    state: Arc<NodeState>,
    connector: Arc<dyn BusConnector>,
    topic: String,
    timing: TimingConfig,
    cancel: CancellationToken,
}

impl TelemetryPublisher {
    pub fn new(
        node_id: impl Into<String>,
        state: Arc<NodeState>,
        connector: Arc<dyn BusConnector>,
        topic: impl Into<String>,
        timing: TimingConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            state,
            connector,
            topic: topic.into(),
            timing,
            cancel,
        }
    }

    /// Run until cancelled.
    pub async fn run(self) {
        self.state
            .info(None, format!("Publisher started on topic '{}'", self.topic));

        while !self.cancel.is_cancelled() {
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect(&self.node_id) => result,
            };

            match connected {
                Ok(bus) => {
                    self.state.info(None, "Connected to MQTT broker");
                    let publisher = Publisher::new(bus, self.topic.clone());
                    self.publish_until_cancelled(&publisher).await;
                    publisher.bus().disconnect().await;
                }
                Err(e) => {
                    self.state.error(
                        None,
                        format!(
                            "MQTT connection failed: {}. Retrying in {}ms",
                            e, self.timing.publish_retry_delay_ms
                        ),
                    );
                    if !self.pause(self.timing.publish_retry_delay()).await {
                        break;
                    }
                }
            }
        }

        self.state.info(None, "Publisher stopped");
        tracing::debug!(node = %self.node_id, "Publisher task exiting");
    }

    async fn publish_until_cancelled(&self, publisher: &Publisher) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let snapshot = self.state.snapshot();
            for (name, value) in &snapshot {
                self.state.debug(Some(name), format!("Publishing {} = {}", name, value));
            }
            let batch = BusMessage::batch(snapshot);
            let state = &self.state;
            let stats = publisher
                .publish_batch(
                    &self.node_id,
                    &batch,
                    self.timing.inter_message_delay(),
                    |message, e| {
                        state.warn(None, format!("Failed to publish '{}': {}", describe(message), e))
                    },
                )
                .await;

            let wait = if stats.all_failed() {
                self.state.error(
                    None,
                    format!(
                        "Publish cycle failed ({} messages). Retrying in {}ms",
                        stats.failed, self.timing.publish_retry_delay_ms
                    ),
                );
                self.timing.publish_retry_delay()
            } else {
                self.state.info(
                    None,
                    format!(
                        "Publish cycle complete ({}/{} messages)",
                        stats.success,
                        stats.total()
                    ),
                );
                self.timing.publish_interval()
            };

            if !self.pause(wait).await {
                return;
            }
        }
    }

    async fn pause(&self, duration: std::time::Duration) -> bool {
        sleep_until_or_cancel(&self.cancel, Instant::now() + duration).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resmon_common::SensorValue;

    #[test]
    fn test_describe_messages() {
        let batch = BusMessage::batch(vec![("RES_0", SensorValue::Unsigned(1))]);
        let labels: Vec<_> = batch.iter().map(describe).collect();
        assert_eq!(labels, vec!["initialStart", "RES_0", "end"]);
    }
}
