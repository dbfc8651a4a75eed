//! Bridge transport interface to external brokers.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Errors raised by a bridge transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

/// Forwards topic traffic to and from an external broker.
///
/// The bus owns the topic wiring; a transport only needs to move opaque
/// payloads. Reconnection and backoff live inside the implementation,
/// the bus assumes "publish" and "deliver" semantics once connected.
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    /// Publish a payload on a broker topic.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Subscribe to a broker topic, returning the incoming payload stream.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, TransportError>;
}
