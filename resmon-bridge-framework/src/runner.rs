//! Bridge runner for lifecycle management.

use std::future::Future;

use tokio::signal;

use resmon_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// Bridge runner that manages the lifecycle of a bridge process.
///
/// Handles:
/// - Logging initialization (with optional CLI override)
/// - Waiting for Ctrl+C
/// - Running the caller's shutdown sequence
///
/// # Example
///
/// ```ignore
/// let runner = BridgeRunner::new_with_args("modbus-mqtt", config, Some(&args))?;
/// let registry = build_registry(runner.config());
/// registry.launch_all();
/// runner.run_until_shutdown(|| async move { registry.shutdown().await }).await
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging.
    name: String,
    /// The loaded configuration.
    config: C,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner with CLI args for log level override.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION");

        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        Ok(Self { name, config })
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Block until Ctrl+C, then run `shutdown` to completion.
    pub async fn run_until_shutdown<F, Fut>(self, shutdown: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        tracing::info!(bridge = %self.name, "Bridge running. Press Ctrl+C to stop.");

        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }

        tracing::info!(bridge = %self.name, "Received shutdown signal");

        shutdown().await;

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}
