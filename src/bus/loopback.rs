//! In-process loopback transport.
//!
//! Joins multiple buses through a shared in-memory "broker" so that
//! cross-node flows can be exercised without an external broker. The
//! broker does not echo a publish back to the side that sent it,
//! mirroring a broker configured without publisher echo.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{BridgeTransport, TransportError};

const SUBSCRIBER_CAPACITY: usize = 64;

#[derive(Default)]
struct Broker {
    // topic -> (side id, delivery channel) per subscription
    topics: Mutex<HashMap<String, Vec<(usize, mpsc::Sender<Vec<u8>>)>>>,
}

/// One side of a loopback broker.
pub struct LoopbackTransport {
    broker: Arc<Broker>,
    side: usize,
}

/// Create two transports joined back-to-back.
///
/// Handing each to a separate [`crate::bus::Bus`] makes those buses
/// behave like two nodes sharing one broker.
pub fn pair() -> (LoopbackTransport, LoopbackTransport) {
    let broker = Arc::new(Broker::default());
    (
        LoopbackTransport {
            broker: Arc::clone(&broker),
            side: 0,
        },
        LoopbackTransport { broker, side: 1 },
    )
}

#[async_trait]
impl BridgeTransport for LoopbackTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut topics = self.broker.topics.lock().await;
        if let Some(subscribers) = topics.get_mut(topic) {
            // Drop subscriptions whose receiving side has gone away.
            let mut closed = Vec::new();
            for (idx, (side, tx)) in subscribers.iter().enumerate() {
                if *side == self.side {
                    continue;
                }
                if tx.send(payload.to_vec()).await.is_err() {
                    closed.push(idx);
                }
            }
            for idx in closed.into_iter().rev() {
                subscribers.remove(idx);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.broker
            .topics
            .lock()
            .await
            .entry(topic.to_string())
            .or_default()
            .push((self.side, tx));
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_other_side() {
        let (a, b) = pair();
        let mut rx = b.subscribe("t").await.unwrap();

        a.publish("t", b"payload").await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"payload".to_vec());
    }

    #[tokio::test]
    async fn test_publish_does_not_echo_to_own_side() {
        let (a, b) = pair();
        let mut own = a.subscribe("t").await.unwrap();
        let mut other = b.subscribe("t").await.unwrap();

        a.publish("t", b"one").await.unwrap();

        assert_eq!(other.recv().await.unwrap(), b"one".to_vec());
        assert!(own.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let (a, b) = pair();
        let mut rx = b.subscribe("t1").await.unwrap();

        a.publish("t2", b"wrong topic").await.unwrap();

        assert!(rx.try_recv().is_err());
    }
}
