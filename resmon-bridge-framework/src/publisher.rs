//! Enveloped message publisher.

use std::sync::Arc;
use std::time::Duration;

use resmon_common::{BusMessage, encode_envelope};

use crate::bus::Bus;
use crate::error::{BridgeError, Result};

/// Publisher for sending bus messages to one topic.
///
/// Wraps a [`Bus`] connection and encodes each [`BusMessage`] into the
/// `{"Node_Id", "data"}` envelope before publishing.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn Bus>,
    topic: String,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(bus: Arc<dyn Bus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    /// Get the underlying bus connection.
    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    /// Publish a single message on behalf of a node.
    pub async fn publish(&self, node_id: &str, message: &BusMessage) -> Result<()> {
        let payload = encode_envelope(node_id, message)
            .map_err(|e| BridgeError::Serialization(e.to_string()))?;
        self.bus.publish(&self.topic, payload).await
    }

    /// Publish a batch in order, pausing `spacing` after every message.
    ///
    /// A failed message is reported to `on_error` and does not stop the rest
    /// of the batch.
    pub async fn publish_batch<F>(
        &self,
        node_id: &str,
        messages: &[BusMessage],
        spacing: Duration,
        mut on_error: F,
    ) -> PublishStats
    where
        F: FnMut(&BusMessage, &BridgeError) + Send,
    {
        let mut stats = PublishStats::default();

        for message in messages {
            match self.publish(node_id, message).await {
                Ok(()) => stats.success += 1,
                Err(e) => {
                    stats.failed += 1;
                    on_error(message, &e);
                }
            }
            tokio::time::sleep(spacing).await;
        }

        stats
    }
}

/// Statistics from a batch publish operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    /// Number of successfully published messages.
    pub success: usize,
    /// Number of failed publishes.
    pub failed: usize,
}

impl PublishStats {
    /// Total number of attempted publishes.
    pub fn total(&self) -> usize {
        self.success + self.failed
    }

    /// True when something was attempted and nothing got through.
    pub fn all_failed(&self) -> bool {
        self.total() > 0 && self.success == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use resmon_common::SensorValue;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        fail_every: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Bus for RecordingBus {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Err(BridgeError::Publish {
                    topic: topic.to_string(),
                    message: "injected".to_string(),
                });
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }

        async fn disconnect(&self) {}
    }

    #[test]
    fn test_publish_stats() {
        let mut stats = PublishStats::default();
        assert_eq!(stats.total(), 0);
        assert!(!stats.all_failed());

        stats.success = 8;
        stats.failed = 2;
        assert_eq!(stats.total(), 10);
        assert!(!stats.all_failed());

        let failed = PublishStats {
            success: 0,
            failed: 3,
        };
        assert!(failed.all_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_continues_after_failure() {
        let bus = Arc::new(RecordingBus {
            fail_every: 2,
            ..RecordingBus::default()
        });
        let publisher = Publisher::new(bus.clone(), "topic/a");

        let batch = BusMessage::batch(vec![
            ("s1", SensorValue::Unsigned(1)),
            ("s2", SensorValue::Unsigned(2)),
        ]);
        let mut failures = Vec::new();
        let stats = publisher
            .publish_batch("N1", &batch, Duration::from_millis(100), |msg, _| {
                failures.push(msg.clone())
            })
            .await;

        assert_eq!(stats.total(), 4);
        assert_eq!(stats.failed, 2);
        assert_eq!(failures.len(), 2);

        let published = bus.published.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|(topic, _)| topic == "topic/a"));
    }
}
