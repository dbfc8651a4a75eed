//! Pods: lightweight handles bound to one bus.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{BusError, Message};

/// Handler invoked for every message a subscription sees.
pub trait MsgHandler: Send + Sync {
    fn handle(&self, msg: Arc<Message>) -> BoxFuture<'static, Result<(), BusError>>;
}

impl<F> MsgHandler for F
where
    F: Fn(Arc<Message>) -> BoxFuture<'static, Result<(), BusError>> + Send + Sync,
{
    fn handle(&self, msg: Arc<Message>) -> BoxFuture<'static, Result<(), BusError>> {
        (self)(msg)
    }
}

/// Cancellable handler registration returned by [`Pod::on`].
///
/// Dropping the subscription cancels delivery to its handler.
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Stop delivering messages to this handler.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A local handle bound to the bus.
///
/// Many pods may share one underlying bus instance. Sending never blocks
/// on subscriber processing; each registered handler consumes from its
/// own task.
#[derive(Clone)]
pub struct Pod {
    sender: broadcast::Sender<Arc<Message>>,
}

impl Pod {
    pub(super) fn new(sender: broadcast::Sender<Arc<Message>>) -> Self {
        Self { sender }
    }

    /// Publish a message to every currently-registered handler.
    pub fn send(&self, msg: Message) {
        let msg_type = msg.msg_type.clone();
        match self.sender.send(Arc::new(msg)) {
            Ok(receivers) => {
                debug!(msg_type = %msg_type, receivers, "message published");
            }
            Err(_) => {
                // No receivers; fine for publish-only pods.
                debug!(msg_type = %msg_type, "message published (no receivers)");
            }
        }
    }

    /// Register a handler for incoming messages.
    ///
    /// The handler runs on its own task; a handler error is logged and
    /// the handler stays subscribed.
    pub fn on(&self, handler: Box<dyn MsgHandler>) -> Subscription {
        let mut rx = self.sender.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if let Err(e) = handler.handle(msg).await {
                            error!(error = %e, "message handler failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(skipped = n, "pod consumer lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription { handle }
    }

    /// Publish `msg` and block until one reply correlated to it arrives.
    ///
    /// Used for request/reply round trips. Returns
    /// [`BusError::ReplyTimeout`] when the deadline elapses first.
    pub async fn send_and_await_reply(
        &self,
        msg: Message,
        deadline: Duration,
    ) -> Result<Arc<Message>, BusError> {
        // Subscribe before sending so the reply cannot slip past.
        let mut rx = self.sender.subscribe();
        let correlation = msg.uuid;
        self.send(msg);

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(reply) if reply.reply_to == Some(correlation) => return Ok(reply),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(skipped = n, "reply consumer lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(BusError::Closed),
                }
            }
        };

        tokio::time::timeout(deadline, wait)
            .await
            .map_err(|_| BusError::ReplyTimeout(deadline))?
    }
}
