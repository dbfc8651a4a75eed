//! Workflow triggers.
//!
//! Builds the initial request/state for a run, drives a sequence, and
//! reports the outcome to its logger. Never exits the process on error.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::{Schedule, Workflow};
use crate::dispatch::Dispatcher;
use crate::request::{CoordinatedRequest, CoordinatedResponse};
use crate::sequence::{Sequence, SequenceError};

/// Method marker for timer-driven runs.
pub const METHOD_SCHEDULE: &str = "SCHED";
/// Method marker for request-driven runs.
pub const METHOD_REQUEST: &str = "REQUEST";

/// Drives workflow runs against one dispatcher.
pub struct Coordinator {
    exec: Arc<dyn Dispatcher>,
}

impl Coordinator {
    pub fn new(exec: Arc<dyn Dispatcher>) -> Self {
        Self { exec }
    }

    /// Run a workflow once with the given body, returning the
    /// accumulated per-step responses.
    pub async fn run_workflow(
        &self,
        workflow: &Workflow,
        body: Vec<u8>,
    ) -> Result<HashMap<String, CoordinatedResponse>, SequenceError> {
        let mut req = build_request(METHOD_REQUEST, &workflow.name, &workflow.state, body);
        let mut seq = Sequence::new(workflow.steps.clone(), Arc::clone(&self.exec));
        seq.execute(&mut req).await?;
        Ok(seq.into_responses())
    }

    /// Spawn one timer task per schedule.
    ///
    /// Each tick builds a fresh request with a new correlation id and
    /// runs the schedule's steps; failures are logged and the timer
    /// keeps going. Tasks run until aborted.
    pub fn start_schedules(&self, schedules: Vec<Schedule>) -> Vec<JoinHandle<()>> {
        schedules
            .into_iter()
            .map(|schedule| {
                let exec = Arc::clone(&self.exec);
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(schedule.every.duration());
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    // The immediate first tick; schedules fire after one
                    // full interval.
                    ticker.tick().await;

                    loop {
                        ticker.tick().await;
                        info!(schedule = %schedule.name, "executing schedule");

                        let mut req = build_request(
                            METHOD_SCHEDULE,
                            &schedule.name,
                            &schedule.state,
                            Vec::new(),
                        );
                        let mut seq =
                            Sequence::new(schedule.steps.clone(), Arc::clone(&exec));

                        if let Err(err) = seq.execute(&mut req).await {
                            match err {
                                SequenceError::Run(run_err) => {
                                    error!(
                                        schedule = %schedule.name,
                                        code = run_err.code,
                                        error = %run_err,
                                        "schedule returned an error"
                                    );
                                }
                                other => {
                                    error!(
                                        schedule = %schedule.name,
                                        error = %other,
                                        "schedule failed"
                                    );
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }
}

/// Build the shared envelope for one run: fresh correlation id, state
/// copied from the static definition.
fn build_request(
    method: &str,
    name: &str,
    initial_state: &HashMap<String, String>,
    body: Vec<u8>,
) -> CoordinatedRequest {
    let state = initial_state
        .iter()
        .map(|(k, v)| (k.clone(), v.clone().into_bytes()))
        .collect();

    CoordinatedRequest {
        method: method.to_string(),
        url: name.to_string(),
        id: Uuid::new_v4().to_string(),
        body,
        headers: HashMap::new(),
        params: HashMap::new(),
        state,
    }
}
