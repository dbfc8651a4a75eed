//! Weft - sandboxed plugin workflows over a bridged message bus.
//!
//! Executes untrusted plugin modules as steps of a workflow, either on
//! the local node or on a remote peer reached through a publish/subscribe
//! message bus.

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod request;
pub mod sequence;
pub mod utils;
