//! Request and response envelopes threaded through a workflow run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Shared envelope for one workflow execution.
///
/// Built once by the trigger and owned by the driving sequence for the
/// duration of the run. `state` is mutated as steps complete; everything
/// else is fixed at construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatedRequest {
    /// Logical trigger kind (request method or schedule marker).
    pub method: String,
    /// Step-addressing name (handler resource or schedule name).
    pub url: String,
    /// Correlation identifier, generated once per execution.
    pub id: String,
    /// Raw input bytes.
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub params: HashMap<String, String>,
    /// Mutable state threaded between steps. Values are opaque blobs.
    pub state: HashMap<String, Vec<u8>>,
}

/// Structured output of one executed module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatedResponse {
    pub output: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl CoordinatedResponse {
    /// Decode a structured response from raw module output.
    ///
    /// Payloads that do not parse as a structured response are carried
    /// whole in `output`. That fallback keeps modules that emit plain
    /// bytes working without a wrapper.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap_or_else(|_| Self {
            output: bytes.to_vec(),
            headers: HashMap::new(),
        })
    }
}
