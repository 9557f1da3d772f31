//! Node registry: owns node configs and starts/stops their worker pairs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use resmon_bridge_framework::BusConnector;

use crate::config::{ConfigError, ConfigSink, NodeConfig, NodeMap, TimingConfig};
use crate::poller::ModbusPoller;
use crate::state::{LinkState, LogEntry, SensorReading, StateStore};
use crate::telemetry::TelemetryPublisher;
use crate::transport::Connector;

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Unknown node '{0}'")]
    UnknownNode(String),
    #[error("Node '{0}' already exists")]
    DuplicateNode(String),
}

/// Lifecycle status of a configured node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Running,
    Stopped,
}

/// Handles of a launched node's workers.
struct NodeRuntime {
    cancel: CancellationToken,
    poller: JoinHandle<()>,
    publisher: JoinHandle<()>,
}

/// Owns every node and its runtime.
pub struct NodeRegistry {
    nodes: RwLock<NodeMap>,
    runtimes: Mutex<HashMap<String, NodeRuntime>>,
    state: Arc<StateStore>,
    connector: Arc<dyn Connector>,
    bus: Arc<dyn BusConnector>,
    topic: String,
    timing: TimingConfig,
    sink: Option<Arc<dyn ConfigSink>>,
}

impl NodeRegistry {
    /// Create a registry over `nodes`. Nothing is launched yet.
    pub fn new(
        nodes: NodeMap,
        connector: Arc<dyn Connector>,
        bus: Arc<dyn BusConnector>,
        topic: impl Into<String>,
        timing: TimingConfig,
    ) -> Self {
        Self {
            nodes: RwLock::new(nodes),
            runtimes: Mutex::new(HashMap::new()),
            state: Arc::new(StateStore::new()),
            connector,
            bus,
            topic: topic.into(),
            timing,
            sink: None,
        }
    }

    /// Persist the node list through `sink` after every change.
    pub fn with_sink(mut self, sink: Arc<dyn ConfigSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn runtimes(&self) -> MutexGuard<'_, HashMap<String, NodeRuntime>> {
        self.runtimes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self) -> Result<(), ConfigError> {
        match &self.sink {
            Some(sink) => sink.save(&self.nodes()),
            None => Ok(()),
        }
    }

    /// Start a node's poller and publisher.
    ///
    /// The stored config is validated first. Returns `Ok(false)` if the node
    /// was already running.
    pub fn launch(&self, node_id: &str) -> Result<bool, RegistryError> {
        let node = self
            .node(node_id)
            .ok_or_else(|| RegistryError::UnknownNode(node_id.to_string()))?;
        node.validate(node_id)?;

        let mut runtimes = self.runtimes();
        if let Some(runtime) = runtimes.get(node_id) {
            if !runtime.cancel.is_cancelled() {
                return Ok(false);
            }
        }

        let state = self.state.allocate(node_id, &node.sensors);
        let cancel = CancellationToken::new();

        let poller = ModbusPoller::new(
            node_id,
            node.clone(),
            Arc::clone(&state),
            Arc::clone(&self.connector),
            self.timing,
            cancel.clone(),
        );
        let publisher = TelemetryPublisher::new(
            node_id,
            Arc::clone(&state),
            Arc::clone(&self.bus),
            self.topic.clone(),
            self.timing,
            cancel.clone(),
        );

        let runtime = NodeRuntime {
            cancel,
            poller: tokio::spawn(poller.run()),
            publisher: tokio::spawn(publisher.run()),
        };
        runtimes.insert(node_id.to_string(), runtime);

        state.info(None, format!("Node launched ({})", node.endpoint()));
        Ok(true)
    }

    /// Launch every configured node. Returns how many were started.
    pub fn launch_all(&self) -> usize {
        let ids: Vec<String> = self.nodes().into_keys().collect();
        let mut launched = 0;
        for id in ids {
            match self.launch(&id) {
                Ok(true) => launched += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(node = %id, error = %e, "Failed to launch node"),
            }
        }
        tracing::info!(launched, "Launched configured nodes");
        launched
    }

    /// Cancel a node's workers and wait up to the stop timeout for them.
    ///
    /// Workers still busy after the timeout are detached; they exit at
    /// their next cancellation check. Returns `false` if it was not running.
    pub async fn stop(&self, node_id: &str) -> bool {
        let Some(runtime) = self.runtimes().remove(node_id) else {
            return false;
        };
        runtime.cancel.cancel();

        let NodeRuntime {
            poller, publisher, ..
        } = runtime;
        let joined = tokio::time::timeout(self.timing.stop_timeout(), async {
            let _ = poller.await;
            let _ = publisher.await;
        })
        .await;

        if let Some(state) = self.state.get(node_id) {
            state.set_link_state(LinkState::Disconnected);
            match joined {
                Ok(()) => state.info(None, "Node stopped"),
                Err(_) => state.warn(
                    None,
                    format!(
                        "Workers did not exit within {}ms, detaching",
                        self.timing.stop_timeout_ms
                    ),
                ),
            }
        }
        true
    }

    /// Stop a node and forget everything about it.
    pub async fn delete(&self, node_id: &str) -> Result<(), RegistryError> {
        if self.node(node_id).is_none() {
            return Err(RegistryError::UnknownNode(node_id.to_string()));
        }

        self.stop(node_id).await;
        self.state.remove(node_id);
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node_id);
        tracing::info!(node = %node_id, "Node deleted");

        self.save()?;
        Ok(())
    }

    /// Validate, store, persist and launch a new node.
    pub fn add_node(&self, node_id: &str, node: NodeConfig) -> Result<(), RegistryError> {
        node.validate(node_id)?;
        {
            let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
            if nodes.contains_key(node_id) {
                return Err(RegistryError::DuplicateNode(node_id.to_string()));
            }
            nodes.insert(node_id.to_string(), node);
        }

        if let Err(e) = self.save() {
            self.nodes
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(node_id);
            return Err(e.into());
        }

        self.launch(node_id)?;
        Ok(())
    }

    /// Replace a node's configuration, relaunching it if it was running.
    pub async fn update_node(&self, node_id: &str, node: NodeConfig) -> Result<(), RegistryError> {
        if self.node(node_id).is_none() {
            return Err(RegistryError::UnknownNode(node_id.to_string()));
        }
        node.validate(node_id)?;

        let was_running = self.status(node_id) == Some(NodeStatus::Running);
        self.stop(node_id).await;

        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id.to_string(), node);
        self.save()?;

        if was_running {
            self.launch(node_id)?;
        }
        Ok(())
    }

    /// Change a node's site label.
    pub fn set_site(&self, node_id: &str, site: impl Into<String>) -> Result<(), RegistryError> {
        {
            let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
            let node = nodes
                .get_mut(node_id)
                .ok_or_else(|| RegistryError::UnknownNode(node_id.to_string()))?;
            node.site = site.into();
        }
        self.save()?;
        Ok(())
    }

    /// `None` when the node is not configured.
    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        if let Some(runtime) = self.runtimes().get(node_id) {
            if !runtime.cancel.is_cancelled() {
                return Some(NodeStatus::Running);
            }
        }
        self.node(node_id).map(|_| NodeStatus::Stopped)
    }

    /// Stop every running node.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.runtimes().keys().cloned().collect();
        tracing::info!(nodes = ids.len(), "Stopping all nodes");
        for id in ids {
            self.stop(&id).await;
        }
    }

    /// Log ring of a node, oldest first. Empty for unknown nodes.
    pub fn logs(&self, node_id: &str) -> Vec<LogEntry> {
        self.state
            .get(node_id)
            .map(|state| state.logs())
            .unwrap_or_default()
    }

    /// Readings of a node in configured order. Empty until first launch.
    pub fn readings(&self, node_id: &str) -> Vec<(String, SensorReading)> {
        self.state
            .get(node_id)
            .map(|state| state.readings())
            .unwrap_or_default()
    }

    pub fn link_state(&self, node_id: &str) -> Option<LinkState> {
        self.state.get(node_id).map(|state| state.link_state())
    }

    /// Copy of the configured nodes.
    pub fn nodes(&self) -> NodeMap {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn node(&self, node_id: &str) -> Option<NodeConfig> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .cloned()
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }
}
