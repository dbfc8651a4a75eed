//! Workflow sequence execution engine.
//!
//! Drives an ordered list of steps against a [`Dispatcher`] for one
//! [`CoordinatedRequest`], threading state between steps and absorbing
//! per-step application errors according to each step's policy. Only
//! conditions that should abort the whole run surface as errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, error, warn};

mod step;

pub use step::{CallableFn, ErrAction, ErrPolicy, Step};

use crate::dispatch::{DispatchError, Dispatcher, RunErr};
use crate::request::{CoordinatedRequest, CoordinatedResponse};

/// Errors that abort a sequence.
#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    /// A step was configured without an FQFN. Configuration defect,
    /// never retried.
    #[error("callable step missing FQFN")]
    MissingFqfn,

    /// A step reported an application error and its policy aborted the
    /// run.
    #[error(transparent)]
    Run(RunErr),

    /// The dispatcher failed before the module could execute.
    #[error("failed to dispatch {fqfn}: {source}")]
    Dispatch {
        fqfn: String,
        #[source]
        source: DispatchError,
    },

    /// A group member task could not be joined.
    #[error("group member failed to join: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Outcome of one executed step.
#[derive(Debug, Clone)]
pub struct FnResult {
    pub fqfn: String,
    /// Stable identifier this result merges under.
    pub key: String,
    pub response: CoordinatedResponse,
    /// Zero value means the step reported no application error.
    pub run_err: RunErr,
}

/// One ordered execution of workflow steps bound to a single
/// request/state context.
///
/// Owned exclusively by the task driving it; never shared across
/// concurrent runs.
pub struct Sequence {
    steps: Vec<Step>,
    exec: Arc<dyn Dispatcher>,
    responses: HashMap<String, CoordinatedResponse>,
}

impl Sequence {
    pub fn new(steps: Vec<Step>, exec: Arc<dyn Dispatcher>) -> Self {
        Self {
            steps,
            exec,
            responses: HashMap::new(),
        }
    }

    /// Responses accumulated so far, keyed by step key.
    pub fn responses(&self) -> &HashMap<String, CoordinatedResponse> {
        &self.responses
    }

    /// Consume the sequence, returning the accumulated responses.
    pub fn into_responses(self) -> HashMap<String, CoordinatedResponse> {
        self.responses
    }

    /// Run every step in order, mutating `req.state` as steps complete.
    ///
    /// Group slots run their members concurrently against a snapshot of
    /// the request and merge after all members complete.
    pub async fn execute(&mut self, req: &mut CoordinatedRequest) -> Result<(), SequenceError> {
        let steps = self.steps.clone();

        for step in steps {
            match step {
                Step::Single(call) => {
                    let result = Self::exec_single(&self.exec, &call, req).await?;
                    if let Some(result) = result {
                        self.absorb(&call, result, req)?;
                    }
                }
                Step::Group { group } => {
                    let results = Self::exec_group(&self.exec, &group, req).await?;
                    for (call, result) in results {
                        if let Some(result) = result {
                            self.absorb(&call, result, req)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Execute one callable against the dispatcher.
    ///
    /// `Ok(None)` means the module ran and produced nothing; the caller
    /// moves on. Transport failures are wrapped with step context and
    /// abort the run.
    async fn exec_single(
        exec: &Arc<dyn Dispatcher>,
        call: &CallableFn,
        req: &CoordinatedRequest,
    ) -> Result<Option<FnResult>, SequenceError> {
        if call.fqfn.is_empty() {
            return Err(SequenceError::MissingFqfn);
        }

        let started = Instant::now();

        let mut run_err = RunErr::none();
        let mut job_result: Option<Vec<u8>> = None;

        match exec.call(&call.fqfn, req).await {
            Ok(Some(output)) if !output.is_empty() => job_result = Some(output),
            // Nil and empty results are legitimate no-op steps.
            Ok(_) => {
                debug!(step = %call.fn_name, "step returned no result");
                return Ok(None);
            }
            Err(DispatchError::Run(err)) => run_err = err,
            Err(source) => {
                return Err(SequenceError::Dispatch {
                    fqfn: call.fqfn.clone(),
                    source,
                });
            }
        }

        let response = match &job_result {
            Some(bytes) => CoordinatedResponse::from_bytes(bytes),
            None => CoordinatedResponse::default(),
        };

        debug!(
            step = %call.fn_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "step executed"
        );

        Ok(Some(FnResult {
            fqfn: call.fqfn.clone(),
            key: call.key(),
            response,
            run_err,
        }))
    }

    /// Run group members concurrently against a snapshot of the request
    /// and join before returning. Results come back in definition order.
    async fn exec_group(
        exec: &Arc<dyn Dispatcher>,
        group: &[CallableFn],
        req: &CoordinatedRequest,
    ) -> Result<Vec<(CallableFn, Option<FnResult>)>, SequenceError> {
        let mut set = JoinSet::new();

        for (idx, call) in group.iter().cloned().enumerate() {
            let exec = Arc::clone(exec);
            let snapshot = req.clone();
            set.spawn(async move {
                let outcome = Self::exec_single(&exec, &call, &snapshot).await;
                (idx, call, outcome)
            });
        }

        let mut slots: Vec<Option<(CallableFn, Option<FnResult>)>> = Vec::new();
        slots.resize_with(group.len(), || None);

        while let Some(joined) = set.join_next().await {
            let (idx, call, outcome) = joined?;
            slots[idx] = Some((call, outcome?));
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Apply one step result: either absorb its error per policy or
    /// merge its response into state.
    fn absorb(
        &mut self,
        call: &CallableFn,
        result: FnResult,
        req: &mut CoordinatedRequest,
    ) -> Result<(), SequenceError> {
        if result.run_err.is_err() {
            if call.should_abort(result.run_err.code) {
                error!(
                    fqfn = %result.fqfn,
                    code = result.run_err.code,
                    "step returned an error, aborting sequence"
                );
                return Err(SequenceError::Run(result.run_err));
            }

            warn!(
                fqfn = %result.fqfn,
                code = result.run_err.code,
                "step returned an error, continuing"
            );
            return Ok(());
        }

        req.state
            .insert(result.key.clone(), result.response.output.clone());
        self.responses.insert(result.key, result.response);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// What the fake dispatcher does for one FQFN.
    #[derive(Clone)]
    enum Behavior {
        Output(Vec<u8>),
        Fail(RunErr),
        Nothing,
        Transport,
    }

    /// Dispatcher double recording every call it sees.
    struct FakeDispatcher {
        behaviors: HashMap<String, Behavior>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeDispatcher {
        fn new(behaviors: Vec<(&str, Behavior)>) -> Arc<Self> {
            Arc::new(Self {
                behaviors: behaviors
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Dispatcher for FakeDispatcher {
        async fn call(
            &self,
            fqfn: &str,
            _req: &CoordinatedRequest,
        ) -> crate::dispatch::Result<Option<Vec<u8>>> {
            self.calls.lock().unwrap().push(fqfn.to_string());
            match self.behaviors.get(fqfn) {
                Some(Behavior::Output(bytes)) => Ok(Some(bytes.clone())),
                Some(Behavior::Fail(err)) => Err(DispatchError::Run(err.clone())),
                Some(Behavior::Nothing) => Ok(None),
                Some(Behavior::Transport) | None => {
                    Err(DispatchError::NotRunnable(fqfn.to_string()))
                }
            }
        }
    }

    fn single(fn_name: &str, fqfn: &str) -> Step {
        Step::Single(CallableFn {
            fn_name: fn_name.to_string(),
            fqfn: fqfn.to_string(),
            ..Default::default()
        })
    }

    fn request() -> CoordinatedRequest {
        CoordinatedRequest {
            method: "REQUEST".to_string(),
            id: "run-1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_each_step_merges_into_state() {
        let exec = FakeDispatcher::new(vec![
            ("ns.a", Behavior::Output(b"one".to_vec())),
            ("ns.b", Behavior::Output(b"two".to_vec())),
            ("ns.c", Behavior::Output(b"three".to_vec())),
        ]);
        let mut seq = Sequence::new(
            vec![single("a", "ns.a"), single("b", "ns.b"), single("c", "ns.c")],
            exec.clone(),
        );
        let mut req = request();

        seq.execute(&mut req).await.unwrap();

        assert_eq!(req.state.len(), 3);
        assert_eq!(req.state.get("a"), Some(&b"one".to_vec()));
        assert_eq!(req.state.get("c"), Some(&b"three".to_vec()));
        assert_eq!(seq.responses().len(), 3);
    }

    #[tokio::test]
    async fn test_later_step_overwrites_same_key() {
        let exec = FakeDispatcher::new(vec![
            ("ns.a", Behavior::Output(b"first".to_vec())),
            ("ns.b", Behavior::Output(b"second".to_vec())),
        ]);
        let shared_key = |fqfn: &str| {
            Step::Single(CallableFn {
                fn_name: "ignored".to_string(),
                fqfn: fqfn.to_string(),
                as_key: Some("slot".to_string()),
                ..Default::default()
            })
        };
        let mut seq = Sequence::new(vec![shared_key("ns.a"), shared_key("ns.b")], exec);
        let mut req = request();

        seq.execute(&mut req).await.unwrap();

        assert_eq!(req.state.len(), 1);
        assert_eq!(req.state.get("slot"), Some(&b"second".to_vec()));
    }

    #[tokio::test]
    async fn test_missing_fqfn_aborts_before_dispatch() {
        let exec = FakeDispatcher::new(vec![
            ("ns.a", Behavior::Output(vec![])),
            ("ns.c", Behavior::Output(vec![])),
        ]);
        let mut seq = Sequence::new(
            vec![single("a", "ns.a"), single("broken", ""), single("c", "ns.c")],
            exec.clone(),
        );
        let mut req = request();

        let err = seq.execute(&mut req).await.unwrap_err();

        assert!(matches!(err, SequenceError::MissingFqfn));
        // The defective step never reached the dispatcher and nothing ran after it.
        assert_eq!(exec.calls(), vec!["ns.a".to_string()]);
    }

    #[tokio::test]
    async fn test_run_err_continues_by_default() {
        let exec = FakeDispatcher::new(vec![
            ("ns.fails", Behavior::Fail(RunErr::new(500, "boom"))),
            ("ns.b", Behavior::Output(b"two".to_vec())),
        ]);
        let mut seq = Sequence::new(
            vec![single("fails", "ns.fails"), single("b", "ns.b")],
            exec.clone(),
        );
        let mut req = request();

        seq.execute(&mut req).await.unwrap();

        // The failed step contributed nothing; the run kept going.
        assert!(!req.state.contains_key("fails"));
        assert_eq!(req.state.get("b"), Some(&b"two".to_vec()));
        assert_eq!(exec.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_abort_policy_stops_the_run() {
        let exec = FakeDispatcher::new(vec![
            ("ns.fails", Behavior::Fail(RunErr::new(500, "boom"))),
            ("ns.b", Behavior::Output(vec![])),
        ]);
        let abort_step = Step::Single(CallableFn {
            fn_name: "fails".to_string(),
            fqfn: "ns.fails".to_string(),
            on_err: Some(ErrPolicy {
                any: ErrAction::Abort,
                ..Default::default()
            }),
            ..Default::default()
        });
        let mut seq = Sequence::new(vec![abort_step, single("b", "ns.b")], exec.clone());
        let mut req = request();

        let err = seq.execute(&mut req).await.unwrap_err();

        match err {
            SequenceError::Run(run_err) => assert_eq!(run_err.code, 500),
            other => panic!("expected Run error, got {other:?}"),
        }
        assert_eq!(exec.calls(), vec!["ns.fails".to_string()]);
    }

    #[tokio::test]
    async fn test_code_override_continues_past_abort_default() {
        let exec = FakeDispatcher::new(vec![
            ("ns.fails", Behavior::Fail(RunErr::new(404, "missing"))),
            ("ns.b", Behavior::Output(b"two".to_vec())),
        ]);
        let tolerant = Step::Single(CallableFn {
            fn_name: "fails".to_string(),
            fqfn: "ns.fails".to_string(),
            on_err: Some(ErrPolicy {
                any: ErrAction::Abort,
                code: HashMap::from([(404, ErrAction::Continue)]),
            }),
            ..Default::default()
        });
        let mut seq = Sequence::new(vec![tolerant, single("b", "ns.b")], exec);
        let mut req = request();

        seq.execute(&mut req).await.unwrap();

        assert_eq!(req.state.get("b"), Some(&b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_transport_failure_is_fatal() {
        let exec = FakeDispatcher::new(vec![
            ("ns.gone", Behavior::Transport),
            ("ns.b", Behavior::Output(vec![])),
        ]);
        let mut seq = Sequence::new(
            vec![single("gone", "ns.gone"), single("b", "ns.b")],
            exec.clone(),
        );
        let mut req = request();

        let err = seq.execute(&mut req).await.unwrap_err();

        match err {
            SequenceError::Dispatch { fqfn, .. } => assert_eq!(fqfn, "ns.gone"),
            other => panic!("expected Dispatch error, got {other:?}"),
        }
        assert_eq!(exec.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_no_result_step_is_a_no_op() {
        let exec = FakeDispatcher::new(vec![
            ("ns.quiet", Behavior::Nothing),
            ("ns.b", Behavior::Output(b"two".to_vec())),
        ]);
        let mut seq = Sequence::new(
            vec![single("quiet", "ns.quiet"), single("b", "ns.b")],
            exec,
        );
        let mut req = request();

        seq.execute(&mut req).await.unwrap();

        assert!(!req.state.contains_key("quiet"));
        assert_eq!(seq.responses().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_output_step_is_a_no_op() {
        let exec = FakeDispatcher::new(vec![
            ("ns.blank", Behavior::Output(Vec::new())),
            ("ns.b", Behavior::Output(b"two".to_vec())),
        ]);
        let mut seq = Sequence::new(
            vec![single("blank", "ns.blank"), single("b", "ns.b")],
            exec,
        );
        let mut req = request();

        seq.execute(&mut req).await.unwrap();

        assert!(!req.state.contains_key("blank"));
        assert_eq!(req.state.get("b"), Some(&b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_structured_output_splits_into_response() {
        let structured = serde_json::to_vec(&CoordinatedResponse {
            output: b"payload".to_vec(),
            headers: HashMap::from([("X-Step".to_string(), "a".to_string())]),
        })
        .unwrap();
        let exec = FakeDispatcher::new(vec![("ns.a", Behavior::Output(structured))]);
        let mut seq = Sequence::new(vec![single("a", "ns.a")], exec);
        let mut req = request();

        seq.execute(&mut req).await.unwrap();

        assert_eq!(req.state.get("a"), Some(&b"payload".to_vec()));
        assert_eq!(
            seq.responses()["a"].headers.get("X-Step"),
            Some(&"a".to_string())
        );
    }

    #[tokio::test]
    async fn test_raw_output_lands_whole_in_state() {
        let exec = FakeDispatcher::new(vec![(
            "ns.a",
            Behavior::Output(b"\x7fnot json".to_vec()),
        )]);
        let mut seq = Sequence::new(vec![single("a", "ns.a")], exec);
        let mut req = request();

        seq.execute(&mut req).await.unwrap();

        assert_eq!(req.state.get("a"), Some(&b"\x7fnot json".to_vec()));
    }

    #[tokio::test]
    async fn test_group_members_all_merge() {
        let exec = FakeDispatcher::new(vec![
            ("ns.one", Behavior::Output(b"1".to_vec())),
            ("ns.two", Behavior::Output(b"2".to_vec())),
            ("ns.three", Behavior::Output(b"3".to_vec())),
            ("ns.after", Behavior::Output(b"4".to_vec())),
        ]);
        let group = Step::Group {
            group: vec![
                CallableFn {
                    fn_name: "one".to_string(),
                    fqfn: "ns.one".to_string(),
                    ..Default::default()
                },
                CallableFn {
                    fn_name: "two".to_string(),
                    fqfn: "ns.two".to_string(),
                    ..Default::default()
                },
                CallableFn {
                    fn_name: "three".to_string(),
                    fqfn: "ns.three".to_string(),
                    ..Default::default()
                },
            ],
        };
        let mut seq = Sequence::new(vec![group, single("after", "ns.after")], exec);
        let mut req = request();

        seq.execute(&mut req).await.unwrap();

        // One slot, three members: three merges plus the following step.
        assert_eq!(req.state.len(), 4);
        assert_eq!(req.state.get("two"), Some(&b"2".to_vec()));
        assert_eq!(req.state.get("after"), Some(&b"4".to_vec()));
    }

    #[tokio::test]
    async fn test_group_run_err_honors_member_policy() {
        let exec = FakeDispatcher::new(vec![
            ("ns.ok", Behavior::Output(b"fine".to_vec())),
            ("ns.fails", Behavior::Fail(RunErr::new(500, "boom"))),
        ]);
        let group = Step::Group {
            group: vec![
                CallableFn {
                    fn_name: "ok".to_string(),
                    fqfn: "ns.ok".to_string(),
                    ..Default::default()
                },
                CallableFn {
                    fn_name: "fails".to_string(),
                    fqfn: "ns.fails".to_string(),
                    ..Default::default()
                },
            ],
        };
        let mut seq = Sequence::new(vec![group], exec);
        let mut req = request();

        seq.execute(&mut req).await.unwrap();

        assert_eq!(req.state.get("ok"), Some(&b"fine".to_vec()));
        assert!(!req.state.contains_key("fails"));
    }

    #[tokio::test]
    async fn test_rerun_produces_identical_state_keys() {
        let behaviors = || {
            FakeDispatcher::new(vec![
                ("ns.a", Behavior::Output(b"one".to_vec())),
                ("ns.b", Behavior::Output(b"two".to_vec())),
            ])
        };
        let steps = vec![single("a", "ns.a"), single("b", "ns.b")];

        let mut first_req = request();
        Sequence::new(steps.clone(), behaviors())
            .execute(&mut first_req)
            .await
            .unwrap();

        let mut second_req = request();
        second_req.id = "run-2".to_string();
        Sequence::new(steps, behaviors())
            .execute(&mut second_req)
            .await
            .unwrap();

        let mut first_keys: Vec<_> = first_req.state.keys().cloned().collect();
        let mut second_keys: Vec<_> = second_req.state.keys().cloned().collect();
        first_keys.sort();
        second_keys.sort();
        assert_eq!(first_keys, second_keys);
    }
}
