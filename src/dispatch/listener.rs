//! Serving side of remote dispatch.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::{ModuleRegistry, MSG_TYPE_EXEC_ERR, MSG_TYPE_EXEC_RESULT};
use crate::bus::{Bus, Message, Subscription};
use crate::request::CoordinatedRequest;

/// Executes incoming bus requests against the local registry.
///
/// Watches every message on the bus and picks up those whose type names
/// a module this node can run; the result (or the module's `RunErr`)
/// goes back as a reply correlated to the request message. Dropping the
/// listener stops serving.
pub struct ExecListener {
    _sub: Subscription,
}

impl ExecListener {
    pub fn start(bus: &Bus, registry: Arc<dyn ModuleRegistry>) -> Self {
        let pod = bus.connect();
        let reply_pod = pod.clone();

        let sub = pod.on(Box::new(move |msg: Arc<Message>| -> BoxFuture<'static, crate::bus::Result<()>> {
            let registry = Arc::clone(&registry);
            let pod = reply_pod.clone();

            Box::pin(async move {
                if !registry.can_run(&msg.msg_type) {
                    return Ok(());
                }

                // One slow module must not hold up the rest of the queue.
                tokio::spawn(async move {
                    let req: CoordinatedRequest = match serde_json::from_slice(&msg.data) {
                        Ok(req) => req,
                        Err(e) => {
                            warn!(fqfn = %msg.msg_type, error = %e, "discarding undecodable execution request");
                            return;
                        }
                    };

                    debug!(fqfn = %msg.msg_type, id = %req.id, "executing remote request");

                    let reply = match registry.invoke(&msg.msg_type, &req).await {
                        Ok(output) => {
                            Message::reply(&msg, MSG_TYPE_EXEC_RESULT, output.unwrap_or_default())
                        }
                        Err(run_err) => {
                            let data = serde_json::to_vec(&run_err).unwrap_or_default();
                            Message::reply(&msg, MSG_TYPE_EXEC_ERR, data)
                        }
                    };

                    pod.send(reply);
                });

                Ok(())
            })
        }));

        Self { _sub: sub }
    }
}
