//! Message envelope carried by the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default topic for messages with no specific type.
pub const MSG_TYPE_DEFAULT: &str = "bus.default";

/// Where a message entered this process's bus.
///
/// Messages injected from a bridge are marked so topic forwarders do not
/// send them back out, which would loop them between processes forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Origin {
    #[default]
    Local,
    Bridge,
}

/// Envelope for one bus message. Ephemeral; exists only in transit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique id, also the correlation key for replies.
    pub uuid: Uuid,
    /// Topic / kind discriminator.
    pub msg_type: String,
    /// UUID of the message this one replies to.
    pub reply_to: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub data: Vec<u8>,
    #[serde(skip)]
    pub origin: Origin,
}

impl Message {
    /// Create a message on the given topic.
    pub fn new(msg_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            msg_type: msg_type.into(),
            reply_to: None,
            timestamp: Utc::now(),
            data,
            origin: Origin::Local,
        }
    }

    /// Create a reply correlated to `to`.
    pub fn reply(to: &Message, msg_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            reply_to: Some(to.uuid),
            ..Self::new(msg_type, data)
        }
    }
}
