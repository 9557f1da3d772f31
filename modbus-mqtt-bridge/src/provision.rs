//! One-shot unit-address assignment over a serial line.
//!
//! Send the broadcast frame, give the device time to store its new id, then
//! read the identity register back from that id. No retries.

use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_modbus::prelude::*;
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};
use tracing::info;

use crate::frame::{IDENTITY_REGISTER, build_address_frame, hex_dump};
use crate::transport::{ContextTransport, ModbusTransport};

/// Highest unit id a device may be given.
pub const MAX_UNIT_ID: u8 = 247;

/// Provisioning errors. A missing reply is an outcome, not an error.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Failed to open serial port: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("Failed to write frame: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid unit id {0}, expected 1-247")]
    InvalidUnitId(u8),
}

/// Serial line and target settings.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub port: String,
    /// 8 data bits, no parity, one stop bit
    pub baud_rate: u32,
    pub new_id: u8,
    pub verify_register: u16,
    pub settle_delay: Duration,
    pub timeout: Duration,
}

impl ProvisionConfig {
    pub fn new(port: impl Into<String>, new_id: u8) -> Self {
        Self {
            port: port.into(),
            baud_rate: 9600,
            new_id,
            verify_register: IDENTITY_REGISTER,
            settle_delay: Duration::from_secs(3),
            timeout: Duration::from_secs(2),
        }
    }

    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.new_id == 0 || self.new_id > MAX_UNIT_ID {
            return Err(ProvisionError::InvalidUnitId(self.new_id));
        }
        Ok(())
    }
}

/// Result of the read-back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Verified,
    Mismatch { read: u16, expected: u16 },
    NoResponse(String),
}

/// Write a frame and flush it.
pub async fn send_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

/// Read the identity register from `new_id` and compare.
pub async fn verify(
    transport: &mut dyn ModbusTransport,
    new_id: u8,
    register: u16,
) -> ProvisionOutcome {
    let expected = u16::from(new_id);
    match transport.read_holding_registers(new_id, register, 1).await {
        Ok(registers) => match registers.first() {
            Some(&read) if read == expected => ProvisionOutcome::Verified,
            Some(&read) => ProvisionOutcome::Mismatch { read, expected },
            None => ProvisionOutcome::NoResponse("empty response".to_string()),
        },
        Err(e) => ProvisionOutcome::NoResponse(e.to_string()),
    }
}

/// Assign `config.new_id` to the device on `config.port`.
pub async fn provision(config: &ProvisionConfig) -> Result<ProvisionOutcome, ProvisionError> {
    config.validate()?;

    let builder = tokio_serial::new(&config.port, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(config.timeout);
    let mut serial = SerialStream::open(&builder)?;

    let frame = build_address_frame(u16::from(config.new_id));
    info!(port = %config.port, frame = %hex_dump(&frame), "Sending address assignment frame");
    send_frame(&mut serial, &frame).await?;

    info!(
        settle_ms = config.settle_delay.as_millis() as u64,
        "Waiting for device to apply new id"
    );
    tokio::time::sleep(config.settle_delay).await;

    let ctx = rtu::attach_slave(serial, Slave(config.new_id));
    let mut transport = ContextTransport::new(ctx, config.timeout);
    let outcome = verify(&mut transport, config.new_id, config.verify_register).await;
    transport.close().await;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PollError;
    use async_trait::async_trait;

    struct FixedReply {
        reply: Option<Vec<u16>>,
        asked: Vec<(u8, u16, u16)>,
    }

    #[async_trait]
    impl ModbusTransport for FixedReply {
        fn is_open(&self) -> bool {
            true
        }

        async fn read_holding_registers(
            &mut self,
            unit: u8,
            address: u16,
            count: u16,
        ) -> Result<Vec<u16>, PollError> {
            self.asked.push((unit, address, count));
            self.reply
                .clone()
                .ok_or_else(|| PollError::Transport("Read timed out after 2000ms".to_string()))
        }

        async fn close(&mut self) {}
    }

    #[tokio::test]
    async fn test_send_frame_writes_exact_bytes() {
        let mut sink = Vec::new();
        send_frame(&mut sink, &build_address_frame(2)).await.unwrap();
        assert_eq!(sink, vec![0x00, 0x06, 0x00, 0x02, 0x00, 0x02, 0xA8, 0x1A]);
    }

    #[tokio::test]
    async fn test_verify_outcomes() {
        let mut ok = FixedReply {
            reply: Some(vec![5]),
            asked: Vec::new(),
        };
        assert_eq!(verify(&mut ok, 5, IDENTITY_REGISTER).await, ProvisionOutcome::Verified);
        assert_eq!(ok.asked, vec![(5, 0x0002, 1)]);

        let mut wrong = FixedReply {
            reply: Some(vec![1]),
            asked: Vec::new(),
        };
        assert_eq!(
            verify(&mut wrong, 5, IDENTITY_REGISTER).await,
            ProvisionOutcome::Mismatch {
                read: 1,
                expected: 5
            }
        );

        let mut silent = FixedReply {
            reply: None,
            asked: Vec::new(),
        };
        assert!(matches!(
            verify(&mut silent, 5, IDENTITY_REGISTER).await,
            ProvisionOutcome::NoResponse(_)
        ));
        assert_eq!(silent.asked.len(), 1);
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = ProvisionConfig::new("/dev/ttyUSB0", 2);
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.verify_register, 0x0002);
        assert_eq!(config.settle_delay, Duration::from_secs(3));
        config.validate().unwrap();

        assert!(ProvisionConfig::new("/dev/ttyUSB0", 0).validate().is_err());
        assert!(ProvisionConfig::new("/dev/ttyUSB0", 248).validate().is_err());
    }
}
