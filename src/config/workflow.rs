//! Static workflow definitions, loaded once at process start.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;
use crate::sequence::Step;

/// Interval specification for a schedule.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Every {
    pub seconds: u64,
    pub minutes: u64,
    pub hours: u64,
}

impl Every {
    /// Total interval. Clamped to at least one second so a blank
    /// definition cannot spin.
    pub fn duration(&self) -> Duration {
        let total = self.seconds + self.minutes * 60 + self.hours * 3600;
        Duration::from_secs(total.max(1))
    }
}

/// A timer-driven workflow.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Schedule {
    pub name: String,
    pub every: Every,
    /// Initial state, copied into each run as opaque byte blobs.
    pub state: HashMap<String, String>,
    pub steps: Vec<Step>,
}

/// A request-triggered workflow.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Workflow {
    pub name: String,
    pub state: HashMap<String, String>,
    pub steps: Vec<Step>,
}

/// Full set of workflow definitions for one node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkflowSet {
    pub schedules: Vec<Schedule>,
    pub workflows: Vec<Workflow>,
}

impl WorkflowSet {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Look up a request-triggered workflow by name.
    pub fn workflow(&self, name: &str) -> Option<&Workflow> {
        self.workflows.iter().find(|wf| wf.name == name)
    }
}
