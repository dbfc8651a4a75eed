//! NATS bridge transport.
//!
//! Mirrors bus topics onto NATS subjects one-to-one. Core NATS gives
//! at-least-once delivery to connected subscribers, which matches the
//! bus contract; ordering across distinct subjects is not guaranteed.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{BridgeTransport, Bus, BusError, TransportError};
use crate::config::MessagingConfig;

const SUBSCRIBER_CAPACITY: usize = 256;

/// Bridge transport backed by a NATS connection.
pub struct NatsTransport {
    client: async_nats::Client,
}

impl NatsTransport {
    /// Connect to a NATS server, retrying with exponential backoff.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = (|| async { async_nats::connect(url).await })
            .retry(ExponentialBuilder::default().with_jitter())
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        info!(url = %url, "connected to NATS");
        Ok(Self { client })
    }
}

#[async_trait]
impl BridgeTransport for NatsTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.client
            .publish(topic.to_string(), payload.to_vec().into())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let mut subscriber = self
            .client
            .subscribe(topic.to_string())
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let subject = topic.to_string();
        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                if tx.send(msg.payload.to_vec()).await.is_err() {
                    warn!(subject = %subject, "bus side dropped, stopping NATS consumer");
                    break;
                }
            }
        });

        Ok(rx)
    }
}

/// Build a bridged bus from messaging configuration.
///
/// Connects the NATS transport and registers every configured bridge
/// topic before returning.
pub async fn bridged_bus(config: &MessagingConfig) -> Result<Bus, BusError> {
    let transport = NatsTransport::connect(&config.nats.url).await?;
    let bus = Bus::with_bridge(transport);

    for topic in &config.bridge_topics {
        bus.connect_bridge_topic(topic).await?;
    }

    Ok(bus)
}
