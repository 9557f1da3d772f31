//! Message bus seam.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// A connected publish/subscribe bus.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish one payload to a topic.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Close the connection; later publishes fail.
    async fn disconnect(&self);
}

/// Opens bus connections.
///
/// `client_tag` identifies the owner of the connection (a node id) and is
/// folded into the client identity.
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self, client_tag: &str) -> Result<Arc<dyn Bus>>;
}
