//! Process-local publish/subscribe bus with optional broker bridging.
//!
//! This module contains:
//! - `Bus`: the hub pods connect to
//! - `Pod`: a send/subscribe handle bound to one bus
//! - `Message`: the envelope moved between pods
//! - `BridgeTransport` trait: mirrors selected topics to an external
//!   broker so pods in other processes see the same logical stream
//!
//! Delivery within one process is at-least-once to each
//! currently-registered handler; bridged delivery inherits the broker's
//! guarantees.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

mod bridge;
pub mod loopback;
mod message;
#[cfg(feature = "nats")]
pub mod nats;
mod pod;

pub use bridge::{BridgeTransport, TransportError};
pub use message::{Message, Origin, MSG_TYPE_DEFAULT};
pub use pod::{MsgHandler, Pod, Subscription};

/// Capacity of the in-process broadcast channel.
const CHANNEL_CAPACITY: usize = 1024;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no bridge transport configured")]
    NoBridge,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no reply within {0:?}")]
    ReplyTimeout(Duration),

    #[error("bus channel closed")]
    Closed,

    #[error("handler failed: {0}")]
    Handler(String),
}

/// Topic-based publish/subscribe hub local to one process.
///
/// Pods created by [`Bus::connect`] share the hub; a configured
/// [`BridgeTransport`] extends selected topics across process boundaries
/// without changing local delivery semantics.
pub struct Bus {
    sender: broadcast::Sender<Arc<Message>>,
    bridge: Option<Arc<dyn BridgeTransport>>,
}

impl Bus {
    /// Create a bus with no bridge. Messages stay in-process.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            bridge: None,
        }
    }

    /// Create a bus bridged to an external broker.
    ///
    /// Topics are only mirrored once registered with
    /// [`Bus::connect_bridge_topic`].
    pub fn with_bridge(transport: impl BridgeTransport + 'static) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            bridge: Some(Arc::new(transport)),
        }
    }

    /// Connect a new pod to this bus.
    pub fn connect(&self) -> Pod {
        Pod::new(self.sender.clone())
    }

    /// Mirror `topic` to and from the external broker.
    ///
    /// Bridging is additive: local pods keep seeing local publishes
    /// directly, and additionally see messages arriving from the broker.
    /// Messages injected from the broker are marked [`Origin::Bridge`]
    /// and never forwarded back out.
    pub async fn connect_bridge_topic(&self, topic: &str) -> Result<()> {
        let transport = Arc::clone(self.bridge.as_ref().ok_or(BusError::NoBridge)?);

        // Inbound: broker -> local pods.
        let mut incoming = transport.subscribe(topic).await?;
        let sender = self.sender.clone();
        let inbound_topic = topic.to_string();
        tokio::spawn(async move {
            while let Some(payload) = incoming.recv().await {
                match serde_json::from_slice::<Message>(&payload) {
                    Ok(mut msg) => {
                        msg.origin = Origin::Bridge;
                        let _ = sender.send(Arc::new(msg));
                    }
                    Err(e) => {
                        warn!(topic = %inbound_topic, error = %e, "discarding undecodable bridge message");
                    }
                }
            }
        });

        // Outbound: local publishes on this topic -> broker.
        let mut rx = self.sender.subscribe();
        let outbound_topic = topic.to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if msg.msg_type != outbound_topic || msg.origin == Origin::Bridge {
                            continue;
                        }
                        match serde_json::to_vec(&*msg) {
                            Ok(payload) => {
                                if let Err(e) =
                                    transport.publish(&outbound_topic, &payload).await
                                {
                                    error!(topic = %outbound_topic, error = %e, "bridge publish failed");
                                }
                            }
                            Err(e) => {
                                error!(topic = %outbound_topic, error = %e, "failed to encode message for bridge");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = %outbound_topic, skipped = n, "bridge forwarder lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        info!(topic = %topic, "bridge topic connected");
        Ok(())
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
