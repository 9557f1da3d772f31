//! Per-node Modbus polling state machine.
//!
//! `Disconnected -> Connecting -> Polling`, back to `Disconnected` on any
//! transport failure. Reads are spaced by the inter-sensor budget and cycles
//! by the poll interval, both measured from the start of the read or cycle.

use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{NodeConfig, SensorConfig, TimingConfig};
use crate::decode::decode_sensor;
use crate::state::{LinkState, NodeState};
use crate::transport::{Connector, ModbusTransport, PollError};
use resmon_common::SensorValue;

/// Sleep until `deadline` unless cancelled first.
///
/// Returns `false` if the token fired. A deadline in the past returns at once.
pub async fn sleep_until_or_cancel(cancel: &CancellationToken, deadline: Instant) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep_until(deadline) => true,
    }
}

/// How a poll cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Complete { errors: usize },
    LinkLost,
    Cancelled,
}

/// Poller for a single node.
pub struct ModbusPoller {
    node_id: String,
    node: NodeConfig,
    state: Arc<NodeState>,
    connector: Arc<dyn Connector>,
    timing: TimingConfig,
    cancel: CancellationToken,
}

impl ModbusPoller {
    pub fn new(
        node_id: impl Into<String>,
        node: NodeConfig,
        state: Arc<NodeState>,
        connector: Arc<dyn Connector>,
        timing: TimingConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node,
            state,
            connector,
            timing,
            cancel,
        }
    }

    /// Run until cancelled.
    pub async fn run(self) {
        self.state.info(
            None,
            format!(
                "Poller started for {} ({} sensors)",
                self.node.endpoint(),
                self.node.sensors.len()
            ),
        );

        while !self.cancel.is_cancelled() {
            self.state.set_link_state(LinkState::Connecting);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect(&self.node.ip, self.node.port) => result,
            };

            match connected {
                Ok(mut transport) => {
                    self.state.set_link_state(LinkState::Polling);
                    self.state
                        .info(None, format!("Connected to {}", self.node.endpoint()));

                    self.poll_until_lost(transport.as_mut()).await;
                    transport.close().await;
                    self.state.set_link_state(LinkState::Disconnected);

                    if !self.cancel.is_cancelled() {
                        self.state.warn(None, "Connection lost, reconnecting");
                    }
                }
                Err(e) => {
                    self.state.set_link_state(LinkState::Disconnected);
                    self.state.error(
                        None,
                        format!(
                            "Failed to connect to {}: {}. Retrying in {}ms",
                            self.node.endpoint(),
                            e,
                            self.timing.reconnect_delay_ms
                        ),
                    );
                    let retry_at = Instant::now() + self.timing.reconnect_delay();
                    if !sleep_until_or_cancel(&self.cancel, retry_at).await {
                        break;
                    }
                }
            }
        }

        self.state.set_link_state(LinkState::Disconnected);
        self.state.info(None, "Poller stopped");
        tracing::debug!(node = %self.node_id, "Poller task exiting");
    }

    async fn poll_until_lost(&self, transport: &mut dyn ModbusTransport) {
        loop {
            let cycle_start = Instant::now();

            match self.poll_cycle(transport).await {
                CycleOutcome::Complete { errors: 0 } => {
                    self.state.info(None, "Poll cycle completed successfully");
                }
                CycleOutcome::Complete { errors } => {
                    self.state.warn(
                        None,
                        format!("Poll cycle completed with some errors ({} failed)", errors),
                    );
                }
                CycleOutcome::LinkLost | CycleOutcome::Cancelled => return,
            }

            if !transport.is_open() {
                return;
            }

            let next_cycle = cycle_start + self.timing.poll_interval();
            if !sleep_until_or_cancel(&self.cancel, next_cycle).await {
                return;
            }
        }
    }

    async fn poll_cycle(&self, transport: &mut dyn ModbusTransport) -> CycleOutcome {
        let mut errors = 0;

        for sensor in &self.node.sensors {
            if self.cancel.is_cancelled() {
                return CycleOutcome::Cancelled;
            }
            if !transport.is_open() {
                return CycleOutcome::LinkLost;
            }

            let read_start = Instant::now();
            let name = sensor.name();

            match read_sensor(transport, sensor).await {
                Ok(value) => match self.state.record_success(name, value) {
                    Ok(()) => self.state.info(Some(name), format!("Read value: {}", value)),
                    Err(e) => self.state.error(Some(name), e.to_string()),
                },
                Err(e) => {
                    errors += 1;
                    if let Err(state_err) = self.state.record_failure(name) {
                        self.state.error(Some(name), state_err.to_string());
                    }
                    if e.is_transport() {
                        self.state.error(Some(name), format!("Read failed: {}", e));
                    } else {
                        self.state.warn(Some(name), format!("Read failed: {}", e));
                    }
                }
            }

            let next_read = read_start + self.timing.inter_sensor_delay();
            if !sleep_until_or_cancel(&self.cancel, next_read).await {
                return CycleOutcome::Cancelled;
            }
        }

        CycleOutcome::Complete { errors }
    }
}

async fn read_sensor(
    transport: &mut dyn ModbusTransport,
    sensor: &SensorConfig,
) -> Result<SensorValue, PollError> {
    let (address, count) = sensor.read_span();
    let registers = transport
        .read_holding_registers(sensor.slave_id(), address, count)
        .await?;
    Ok(decode_sensor(sensor, &registers)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_past_deadline_returns_immediately() {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        tokio::time::advance(Duration::from_millis(10)).await;

        assert!(sleep_until_or_cancel(&cancel, start).await);
        assert_eq!(Instant::now() - start, Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            child.cancel();
        });

        let start = Instant::now();
        let finished = sleep_until_or_cancel(&cancel, start + Duration::from_secs(60)).await;

        assert!(!finished);
        assert!(Instant::now() - start < Duration::from_secs(1));
    }
}
