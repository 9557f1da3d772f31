//! Assign a Modbus unit id to a freshly installed sensor.
//!
//! Only one device may be on the serial line: the frame is a broadcast.

use anyhow::{Context, Result, bail};
use clap::Parser;
use modbus_mqtt_bridge::provision::{ProvisionConfig, ProvisionOutcome, provision};
use resmon_common::{LogFormat, LoggingConfig};
use std::time::Duration;

/// Broadcast a new unit id to the device on a serial port and verify it.
#[derive(Parser, Debug)]
#[command(name = "resmon-provision")]
#[command(version)]
struct Args {
    /// Serial port (e.g. /dev/ttyUSB0 or COM3)
    #[arg(short, long)]
    port: String,

    /// Unit id to assign (1-247)
    #[arg(short, long)]
    id: u8,

    /// Baud rate, 8N1
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,

    /// Holding register read back to verify the new id
    #[arg(long, default_value_t = 0x0002)]
    verify_register: u16,

    /// Milliseconds to wait before verifying
    #[arg(long, default_value_t = 3000)]
    settle_ms: u64,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    resmon_common::init_tracing(&LoggingConfig {
        level: args.log_level.clone(),
        format: LogFormat::Text,
    })
    .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    let mut config = ProvisionConfig::new(&args.port, args.id);
    config.baud_rate = args.baud;
    config.verify_register = args.verify_register;
    config.settle_delay = Duration::from_millis(args.settle_ms);

    let outcome = provision(&config)
        .await
        .with_context(|| format!("Provisioning on {} failed", args.port))?;

    match outcome {
        ProvisionOutcome::Verified => {
            println!("Device now answers as unit {}", args.id);
            Ok(())
        }
        ProvisionOutcome::Mismatch { read, expected } => {
            bail!("Verification mismatch: read {} from register, expected {}", read, expected)
        }
        ProvisionOutcome::NoResponse(reason) => {
            bail!("No response from unit {}: {}", args.id, reason)
        }
    }
}
