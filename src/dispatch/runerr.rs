//! Application-level errors reported by executed modules.

use serde::{Deserialize, Serialize};

/// Error returned by a module that ran and failed at the application
/// level. Distinct from transport failures: the module executed.
///
/// The zero value (`code == 0 && message == ""`) means "no error" and is
/// preserved exactly on the wire.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, thiserror::Error,
)]
#[serde(default)]
#[error("run error {code}: {message}")]
pub struct RunErr {
    pub code: i32,
    pub message: String,
}

impl RunErr {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The "no error" sentinel.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.code == 0 && self.message.is_empty()
    }

    pub fn is_err(&self) -> bool {
        !self.is_none()
    }
}
