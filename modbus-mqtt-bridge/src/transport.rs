//! Modbus transport seam.
//!
//! The poller only sees [`ModbusTransport`] and [`Connector`]; the TCP
//! implementation here wraps a `tokio-modbus` client context.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use crate::decode::DecodeError;

/// Error type for polling operations.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// Connect, read or timeout failure; the link is unusable afterwards.
    #[error("Transport error: {0}")]
    Transport(String),
    /// The device answered with a Modbus exception.
    #[error("Modbus exception: {0}")]
    Protocol(String),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl PollError {
    pub fn is_transport(&self) -> bool {
        matches!(self, PollError::Transport(_))
    }
}

/// An open link to a Modbus gateway or serial line.
#[async_trait]
pub trait ModbusTransport: Send {
    /// False once a transport failure has been observed.
    fn is_open(&self) -> bool;

    /// Read `count` holding registers starting at `address` from unit `unit`.
    async fn read_holding_registers(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, PollError>;

    async fn close(&mut self);
}

/// Opens transports for the poller.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn ModbusTransport>, PollError>;
}

/// [`ModbusTransport`] over a `tokio-modbus` client context.
pub struct ContextTransport {
    ctx: Option<Context>,
    read_timeout: Duration,
}

impl ContextTransport {
    pub fn new(ctx: Context, read_timeout: Duration) -> Self {
        Self {
            ctx: Some(ctx),
            read_timeout,
        }
    }
}

#[async_trait]
impl ModbusTransport for ContextTransport {
    fn is_open(&self) -> bool {
        self.ctx.is_some()
    }

    async fn read_holding_registers(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, PollError> {
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| PollError::Transport("Not connected".to_string()))?;
        ctx.set_slave(Slave(unit));

        let result =
            tokio::time::timeout(self.read_timeout, ctx.read_holding_registers(address, count))
                .await;

        match result {
            Ok(Ok(Ok(registers))) => Ok(registers),
            Ok(Ok(Err(exception))) => Err(PollError::Protocol(format!("{:?}", exception))),
            Ok(Err(e)) => {
                self.ctx = None;
                Err(PollError::Transport(e.to_string()))
            }
            Err(_) => {
                self.ctx = None;
                Err(PollError::Transport(format!(
                    "Read timed out after {}ms",
                    self.read_timeout.as_millis()
                )))
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            let _ = ctx.disconnect().await;
        }
    }
}

/// Connects to Modbus TCP gateways.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn ModbusTransport>, PollError> {
        let connect = async {
            let addr: SocketAddr = tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| PollError::Transport(format!("Invalid address: {}", e)))?
                .next()
                .ok_or_else(|| {
                    PollError::Transport(format!("No address found for {}:{}", host, port))
                })?;

            tcp::connect(addr)
                .await
                .map_err(|e| PollError::Transport(e.to_string()))
        };

        let ctx = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| PollError::Transport("Connection timeout".to_string()))??;

        Ok(Box::new(ContextTransport::new(ctx, self.read_timeout)))
    }
}
