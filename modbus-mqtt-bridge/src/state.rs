//! Shared per-node state: last readings, link state and the log ring.
//!
//! A node's poller writes here and its publisher reads. Every lock is a
//! `std::sync::Mutex` held only for the duration of a copy, never across an
//! `.await`.

use chrono::{DateTime, Local};
use resmon_common::SensorValue;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use thiserror::Error;

use crate::config::SensorConfig;

/// Entries kept per node before the oldest is evicted.
pub const LOG_CAPACITY: usize = 300;

/// State errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Node '{node}' has no sensor named '{sensor}'")]
    UnknownSensor { node: String, sensor: String },
}

/// Status of the last read of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReadingStatus {
    /// Not read yet since launch
    Init,
    Ok,
    Error,
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadingStatus::Init => "INIT",
            ReadingStatus::Ok => "OK",
            ReadingStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Last known reading of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    /// Last successfully decoded value, `0.0` until the first success
    pub value: SensorValue,
    pub status: ReadingStatus,
    /// When `value` was last written
    pub last_success: Option<DateTime<Local>>,
}

impl Default for SensorReading {
    fn default() -> Self {
        Self {
            value: SensorValue::default(),
            status: ReadingStatus::Init,
            last_success: None,
        }
    }
}

/// Connection state of a node's poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Polling,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Polling => "polling",
        };
        f.write_str(s)
    }
}

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

/// One line of a node's operator log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub node: Option<String>,
    pub sensor: Option<String>,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}]",
            self.timestamp.format("%H:%M:%S"),
            self.level.as_str()
        )?;
        if let Some(node) = &self.node {
            write!(f, " [NODE {}]", node)?;
        }
        if let Some(sensor) = &self.sensor {
            write!(f, " [{}]", sensor)?;
        }
        write!(f, " {}", self.message)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State slice of a single node.
#[derive(Debug)]
pub struct NodeState {
    node_id: String,
    /// One entry per configured sensor, in configured order
    readings: Mutex<Vec<(String, SensorReading)>>,
    /// Shared with the slices of later launches of the same node
    log: Arc<Mutex<VecDeque<LogEntry>>>,
    link: Mutex<LinkState>,
}

impl NodeState {
    /// Fresh state with one `Init` reading per sensor name.
    pub fn new<I, S>(node_id: impl Into<String>, sensors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_log(node_id, sensors, empty_log())
    }

    fn with_log<I, S>(
        node_id: impl Into<String>,
        sensors: I,
        log: Arc<Mutex<VecDeque<LogEntry>>>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            node_id: node_id.into(),
            readings: Mutex::new(fresh_readings(sensors)),
            log,
            link: Mutex::new(LinkState::Disconnected),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Store a decoded value and mark the sensor OK.
    pub fn record_success(&self, sensor: &str, value: SensorValue) -> Result<(), StateError> {
        self.update(sensor, |reading| {
            reading.value = value;
            reading.status = ReadingStatus::Ok;
            reading.last_success = Some(Local::now());
        })
    }

    /// Mark the sensor ERROR, keeping its last value.
    pub fn record_failure(&self, sensor: &str) -> Result<(), StateError> {
        self.update(sensor, |reading| reading.status = ReadingStatus::Error)
    }

    fn update<F: FnOnce(&mut SensorReading)>(&self, sensor: &str, f: F) -> Result<(), StateError> {
        let mut readings = lock(&self.readings);
        match readings.iter_mut().find(|(name, _)| name == sensor) {
            Some((_, reading)) => {
                f(reading);
                Ok(())
            }
            None => Err(StateError::UnknownSensor {
                node: self.node_id.clone(),
                sensor: sensor.to_string(),
            }),
        }
    }

    /// Current values in configured order, taken under one lock.
    pub fn snapshot(&self) -> Vec<(String, SensorValue)> {
        lock(&self.readings)
            .iter()
            .map(|(name, reading)| (name.clone(), reading.value))
            .collect()
    }

    /// Full readings in configured order.
    pub fn readings(&self) -> Vec<(String, SensorReading)> {
        lock(&self.readings).clone()
    }

    pub fn reading(&self, sensor: &str) -> Option<SensorReading> {
        lock(&self.readings)
            .iter()
            .find(|(name, _)| name == sensor)
            .map(|(_, reading)| reading.clone())
    }

    pub fn link_state(&self) -> LinkState {
        *lock(&self.link)
    }

    pub fn set_link_state(&self, state: LinkState) {
        *lock(&self.link) = state;
    }

    /// Append to the ring and mirror the entry to `tracing`.
    pub fn log(&self, level: LogLevel, sensor: Option<&str>, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            level,
            node: Some(self.node_id.clone()),
            sensor: sensor.map(str::to_string),
            message: message.into(),
        };
        emit(&entry);

        let mut log = lock(&self.log);
        if log.len() >= LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(entry);
    }

    pub fn debug(&self, sensor: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Debug, sensor, message);
    }

    pub fn info(&self, sensor: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Info, sensor, message);
    }

    pub fn warn(&self, sensor: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Warning, sensor, message);
    }

    pub fn error(&self, sensor: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Error, sensor, message);
    }

    /// Log entries, oldest first.
    pub fn logs(&self) -> Vec<LogEntry> {
        lock(&self.log).iter().cloned().collect()
    }
}

fn empty_log() -> Arc<Mutex<VecDeque<LogEntry>>> {
    Arc::new(Mutex::new(VecDeque::with_capacity(LOG_CAPACITY)))
}

fn fresh_readings<I, S>(sensors: I) -> Vec<(String, SensorReading)>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    sensors
        .into_iter()
        .map(|name| (name.into(), SensorReading::default()))
        .collect()
}

fn emit(entry: &LogEntry) {
    let node = entry.node.as_deref().unwrap_or("-");
    let sensor = entry.sensor.as_deref().unwrap_or("-");
    match entry.level {
        LogLevel::Debug => tracing::debug!(node, sensor, "{}", entry.message),
        LogLevel::Info => tracing::info!(node, sensor, "{}", entry.message),
        LogLevel::Warning => tracing::warn!(node, sensor, "{}", entry.message),
        LogLevel::Error => tracing::error!(node, sensor, "{}", entry.message),
    }
}

/// All node state slices, keyed by node id.
#[derive(Debug, Default)]
pub struct StateStore {
    nodes: RwLock<HashMap<String, Arc<NodeState>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the slice for a node about to be launched.
    ///
    /// Every launch gets fresh readings and link state, so workers detached
    /// from an earlier launch only ever write to their own slice. The log
    /// ring carries over from the previous slice.
    pub fn allocate(&self, node_id: &str, sensors: &[SensorConfig]) -> Arc<NodeState> {
        let names = sensors.iter().map(|s| s.name().to_string());
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let log = nodes
            .get(node_id)
            .map(|previous| Arc::clone(&previous.log))
            .unwrap_or_else(empty_log);
        let state = Arc::new(NodeState::with_log(node_id, names, log));
        nodes.insert(node_id.to_string(), Arc::clone(&state));
        state
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<NodeState>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .cloned()
    }

    /// Drop every entry held for a node.
    pub fn remove(&self, node_id: &str) -> Option<Arc<NodeState>> {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
