//! Sequential chains that thread each step's output into the next.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use subagent_core::{ExecutionResult, RunError, TaskId, TaskSpec};
use subagent_launcher::{ProgressFn, TaskRunner};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The step that stopped a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainFailure {
    /// 1-based position of the failing step.
    pub step: usize,
    pub message: String,
}

/// Results of a chain, up to and including the failing step if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub results: Vec<ExecutionResult>,
    pub failure: Option<ChainFailure>,
}

impl ChainOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Final output of the last step that ran.
    pub fn final_output(&self) -> String {
        self.results
            .last()
            .map(ExecutionResult::final_output)
            .unwrap_or_default()
    }
}

/// Check a chain without running anything.
pub fn validate_chain(steps: &[TaskSpec]) -> Result<(), RunError> {
    if steps.is_empty() {
        return Err(RunError::invalid_input("chain must contain at least one step"));
    }
    for (index, step) in steps.iter().enumerate() {
        step.validate().map_err(|e| {
            RunError::invalid_input(format!("step {} ({}): {}", index + 1, step.agent, e.message))
        })?;
    }
    Ok(())
}

/// Run `steps` one after another.
///
/// Every `{previous}` in a step's task is replaced with the final output of
/// the step before it. The first failing step ends the chain; later steps
/// never run. `progress` receives the settled results so far plus the
/// running step's latest snapshot.
pub async fn run_chain(
    runner: Arc<dyn TaskRunner>,
    steps: Vec<TaskSpec>,
    cancel: CancellationToken,
    progress: Option<watch::Sender<Vec<ExecutionResult>>>,
) -> Result<ChainOutcome, RunError> {
    validate_chain(&steps)?;

    let total = steps.len();
    let settled: Arc<Mutex<Vec<ExecutionResult>>> = Arc::new(Mutex::new(Vec::new()));
    let progress = progress.map(Arc::new);
    let mut previous = String::new();

    for (index, step) in steps.iter().enumerate() {
        let position = index + 1;
        let spec = step.with_previous_output(&previous).with_step(position);
        if spec.task.trim().is_empty() {
            let message = format!(
                "step {position} ({}) has no task once the previous output is substituted",
                spec.agent
            );
            warn!(step = position, total, "Chain stopped before an empty step");
            return Ok(ChainOutcome {
                results: take(&settled),
                failure: Some(ChainFailure {
                    step: position,
                    message,
                }),
            });
        }
        info!(step = position, total, agent = %spec.agent, "Running chain step");

        let relay: Option<ProgressFn> = progress.clone().map(|sender| {
            let settled = settled.clone();
            Arc::new(move |snapshot: ExecutionResult| {
                let mut view = settled.lock().unwrap_or_else(PoisonError::into_inner).clone();
                view.push(snapshot);
                sender.send_replace(view);
            }) as ProgressFn
        });

        let result = runner
            .run(TaskId::generate(), &spec, cancel.child_token(), relay)
            .await?;

        let failed = result.is_failure();
        let message = result.failure_message();
        let output = result.final_output();
        {
            let mut settled = settled.lock().unwrap_or_else(PoisonError::into_inner);
            settled.push(result);
            if let Some(sender) = &progress {
                sender.send_replace(settled.clone());
            }
        }

        if failed {
            warn!(step = position, total, error = %message, "Chain stopped at failing step");
            return Ok(ChainOutcome {
                results: take(&settled),
                failure: Some(ChainFailure {
                    step: position,
                    message,
                }),
            });
        }
        previous = output;
    }

    info!(total, "Chain finished");
    Ok(ChainOutcome {
        results: take(&settled),
        failure: None,
    })
}

fn take(settled: &Mutex<Vec<ExecutionResult>>) -> Vec<ExecutionResult> {
    std::mem::take(&mut *settled.lock().unwrap_or_else(PoisonError::into_inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{task, FakeRunner};

    #[tokio::test]
    async fn test_previous_output_is_threaded() {
        let runner = Arc::new(FakeRunner::new());
        let steps = vec![
            task("scout", "list files"),
            task("planner", "plan from: {previous}"),
            task("worker", "do {previous} and then {previous}"),
        ];

        let outcome = run_chain(runner.clone(), steps, CancellationToken::new(), None)
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.results.len(), 3);
        let seen = runner.seen_tasks();
        assert_eq!(seen[0], "list files");
        assert_eq!(seen[1], "plan from: done: list files");
        assert_eq!(
            seen[2],
            "do done: plan from: done: list files and then done: plan from: done: list files"
        );
        let steps: Vec<Option<usize>> = outcome.results.iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![Some(1), Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn test_first_step_sees_empty_previous() {
        let runner = Arc::new(FakeRunner::new());
        let steps = vec![task("scout", "start:{previous}:end")];

        run_chain(runner.clone(), steps, CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(runner.seen_tasks(), vec!["start::end".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_step_stops_chain() {
        let runner = Arc::new(FakeRunner::new());
        let steps = vec![
            task("a", "first"),
            task("b", "[fail] {previous}"),
            task("c", "never"),
        ];

        let outcome = run_chain(runner.clone(), steps, CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 2);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.step, 2);
        assert_eq!(failure.message, "boom");
        assert_eq!(runner.invocations(), 2);
    }

    #[tokio::test]
    async fn test_empty_substituted_step_stops_chain() {
        let runner = Arc::new(FakeRunner::new());
        let steps = vec![
            task("a", "write files [silent]"),
            task("b", "{previous}"),
            task("c", "never"),
        ];

        let outcome = run_chain(runner.clone(), steps, CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].exit_code, 0);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.step, 2);
        assert!(failure.message.contains("step 2 (b)"));
        assert_eq!(runner.invocations(), 1);
    }

    #[tokio::test]
    async fn test_empty_chain_rejected() {
        let runner = Arc::new(FakeRunner::new());
        let err = run_chain(runner.clone(), vec![], CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, subagent_core::ErrorCode::InvalidInput);

        let steps = vec![task("a", "ok"), TaskSpec::new("b", "x", "")];
        let err = run_chain(runner.clone(), steps, CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(err.message.contains("step 2 (b)"));
        assert_eq!(runner.invocations(), 0);
    }

    #[tokio::test]
    async fn test_cancel_propagates() {
        let runner = Arc::new(FakeRunner::new());
        let cancel = CancellationToken::new();
        let steps = vec![task("a", "[hang]"), task("b", "never")];

        let chain = tokio::spawn(run_chain(runner.clone(), steps, cancel.clone(), None));
        while runner.running() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        cancel.cancel();

        let err = chain.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(runner.invocations(), 1);
    }

    #[tokio::test]
    async fn test_progress_includes_settled_steps() {
        let runner = Arc::new(FakeRunner::new());
        let (tx, rx) = watch::channel(Vec::new());
        let steps = vec![task("a", "one"), task("b", "two")];

        run_chain(runner, steps, CancellationToken::new(), Some(tx))
            .await
            .unwrap();

        let view = rx.borrow().clone();
        assert_eq!(view.len(), 2);
        assert!(view.iter().all(|r| r.exit_code == 0));
    }
}
