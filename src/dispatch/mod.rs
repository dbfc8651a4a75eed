//! Local/remote execution dispatch.
//!
//! The [`Executor`] hides where a module runs behind one call contract:
//! modules the local registry can load run in-process, everything else
//! becomes a publish/await-reply round trip over the bus. Callers only
//! ever see output bytes, a typed [`RunErr`], or a transport failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

mod listener;
mod registry;
mod runerr;

pub use listener::ExecListener;
pub use registry::{ModuleRegistry, StaticRegistry};
pub use runerr::RunErr;

use crate::bus::{Bus, BusError, Message};
use crate::request::CoordinatedRequest;

/// Reply topic for successful remote executions.
pub const MSG_TYPE_EXEC_RESULT: &str = "exec.result";
/// Reply topic for remote executions that reported a [`RunErr`].
pub const MSG_TYPE_EXEC_ERR: &str = "exec.err";

/// Default deadline for a remote round trip.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors surfaced by [`Dispatcher::call`].
///
/// Only [`DispatchError::Run`] means the module executed; every other
/// variant is a transport or resolution failure and the module may not
/// have run at all.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The module executed and reported an application-level failure.
    #[error(transparent)]
    Run(#[from] RunErr),

    #[error("no local module and no bus route for {0}")]
    NotRunnable(String),

    #[error("serialization failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("remote reply timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Bus(BusError),

    #[error("unexpected reply type {0}")]
    BadReply(String),
}

/// One call contract for executing a module, wherever it lives.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Execute `fqfn` against `req`, returning the module's raw output.
    ///
    /// `Ok(None)` means the module ran and produced no output.
    async fn call(&self, fqfn: &str, req: &CoordinatedRequest) -> Result<Option<Vec<u8>>>;
}

/// Dispatcher that runs modules locally when it can and over the bus
/// when it cannot.
pub struct Executor {
    registry: Arc<dyn ModuleRegistry>,
    bus: Option<Arc<Bus>>,
    deadline: Duration,
}

impl Executor {
    /// Executor without a bus: only locally-loadable modules resolve.
    pub fn new(registry: Arc<dyn ModuleRegistry>) -> Self {
        Self {
            registry,
            bus: None,
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Executor that falls back to remote peers reached over `bus`.
    pub fn with_bus(registry: Arc<dyn ModuleRegistry>, bus: Arc<Bus>, deadline: Duration) -> Self {
        Self {
            registry,
            bus: Some(bus),
            deadline,
        }
    }

    async fn call_remote(
        &self,
        bus: &Bus,
        fqfn: &str,
        req: &CoordinatedRequest,
    ) -> Result<Option<Vec<u8>>> {
        let payload = serde_json::to_vec(req)?;
        let msg = Message::new(fqfn, payload);

        debug!(fqfn = %fqfn, id = %req.id, "dispatching to remote peer");

        let pod = bus.connect();
        let reply = pod
            .send_and_await_reply(msg, self.deadline)
            .await
            .map_err(|e| match e {
                BusError::ReplyTimeout(d) => DispatchError::Timeout(d),
                other => DispatchError::Bus(other),
            })?;

        match reply.msg_type.as_str() {
            MSG_TYPE_EXEC_RESULT => {
                if reply.data.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(reply.data.clone()))
                }
            }
            MSG_TYPE_EXEC_ERR => {
                let run_err: RunErr = serde_json::from_slice(&reply.data)?;
                Err(DispatchError::Run(run_err))
            }
            other => Err(DispatchError::BadReply(other.to_string())),
        }
    }
}

#[async_trait]
impl Dispatcher for Executor {
    async fn call(&self, fqfn: &str, req: &CoordinatedRequest) -> Result<Option<Vec<u8>>> {
        if self.registry.can_run(fqfn) {
            debug!(fqfn = %fqfn, id = %req.id, "executing locally");
            return self
                .registry
                .invoke(fqfn, req)
                .await
                .map_err(DispatchError::Run);
        }

        match &self.bus {
            Some(bus) => self.call_remote(bus, fqfn, req).await,
            None => Err(DispatchError::NotRunnable(fqfn.to_string())),
        }
    }
}

/// Bridge the topics remote execution rides on: each FQFN plus the two
/// reply topics. Call on every node that dispatches or serves modules
/// across the bridge.
pub async fn connect_exec_topics(bus: &Bus, fqfns: &[&str]) -> std::result::Result<(), BusError> {
    for fqfn in fqfns {
        bus.connect_bridge_topic(fqfn).await?;
    }
    bus.connect_bridge_topic(MSG_TYPE_EXEC_RESULT).await?;
    bus.connect_bridge_topic(MSG_TYPE_EXEC_ERR).await?;
    Ok(())
}
