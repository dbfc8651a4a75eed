//! Workflow step definitions.
//!
//! Steps come from a workflow definition loaded once at process start
//! and are immutable afterwards.

use std::collections::HashMap;

use serde::Deserialize;

/// What to do when a step reports an application error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrAction {
    /// Keep going; the failed step contributes nothing to state.
    #[default]
    Continue,
    /// Stop the sequence immediately.
    Abort,
}

/// Per-step error policy: a default action plus per-code overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ErrPolicy {
    pub any: ErrAction,
    pub code: HashMap<i32, ErrAction>,
}

impl ErrPolicy {
    /// Resolve the action for a specific error code.
    pub fn action_for(&self, code: i32) -> ErrAction {
        self.code.get(&code).copied().unwrap_or(self.any)
    }
}

/// A single callable step of a workflow.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CallableFn {
    /// Display name.
    #[serde(rename = "fn")]
    pub fn_name: String,
    /// Fully-qualified function name; required before dispatch.
    pub fqfn: String,
    /// Key alias for merging this step's output into state.
    #[serde(rename = "as")]
    pub as_key: Option<String>,
    #[serde(rename = "onErr")]
    pub on_err: Option<ErrPolicy>,
}

impl CallableFn {
    /// Stable key this step's output merges under.
    pub fn key(&self) -> String {
        self.as_key.clone().unwrap_or_else(|| self.fn_name.clone())
    }

    /// Whether a run error with `code` should abort the sequence.
    /// Steps without a policy continue.
    pub fn should_abort(&self, code: i32) -> bool {
        self.on_err
            .as_ref()
            .map(|policy| policy.action_for(code) == ErrAction::Abort)
            .unwrap_or(false)
    }
}

/// One slot in a workflow: a single call, or a group of calls executed
/// concurrently and joined before the next slot.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Group { group: Vec<CallableFn> },
    Single(CallableFn),
}
