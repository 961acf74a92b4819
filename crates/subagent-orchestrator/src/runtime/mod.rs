//! Program runtime: spawn, join and fan out tasks within one run.
//!
//! Every task spawned here hangs off the runtime's cancellation token, which
//! itself is a child of the token the runtime was created with. Cancelling
//! either one, or the optional per-call token, stops the task.

mod observer;
mod program;
mod workspace;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use futures_util::future::{join_all, BoxFuture, Shared};
use futures_util::FutureExt;
use subagent_core::{EventKind, ExecutionResult, RunError, RunId, TaskId, TaskSpec};
use subagent_launcher::{ProgressFn, TaskRunner};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::observability::ObservabilityStore;

pub use observer::Observer;
pub use program::{Instruction, Program, ProgramOutput};
pub use workspace::Workspace;

/// Error text returned when `join` receives an already settled result.
pub const JOIN_SETTLED_HINT: &str =
    "join() expects a spawn handle but received a settled result; pass the handle returned by spawn(), not the result of join()";

/// Receives every task's latest state whenever one of them changes.
pub type SummaryFn = Arc<dyn Fn(Vec<ExecutionResult>) + Send + Sync>;

type TaskFuture = Shared<BoxFuture<'static, Result<ExecutionResult, RunError>>>;

/// Handle on one spawned task.
///
/// Cloning is cheap. Every clone joins the same task and sees the same
/// settled result.
#[derive(Clone)]
pub struct SpawnHandle {
    task_id: TaskId,
    agent: String,
    result: TaskFuture,
}

impl SpawnHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Wait for the task to settle.
    pub async fn join(&self) -> Result<ExecutionResult, RunError> {
        self.result.clone().await
    }

    /// The settled outcome, if the task already finished.
    pub fn peek(&self) -> Option<Result<ExecutionResult, RunError>> {
        self.result.peek().cloned()
    }
}

impl std::fmt::Debug for SpawnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnHandle")
            .field("task_id", &self.task_id)
            .field("agent", &self.agent)
            .field("settled", &self.result.peek().is_some())
            .finish()
    }
}

/// Argument of [`ProgramRuntime::join`].
///
/// The settled variants exist so that passing a result where a handle is
/// expected fails with a clear message instead of a type puzzle.
#[derive(Debug, Clone)]
pub enum JoinTarget {
    Handle(SpawnHandle),
    Handles(Vec<SpawnHandle>),
    Settled(ExecutionResult),
    SettledMany(Vec<ExecutionResult>),
}

impl From<SpawnHandle> for JoinTarget {
    fn from(handle: SpawnHandle) -> Self {
        Self::Handle(handle)
    }
}

impl From<&SpawnHandle> for JoinTarget {
    fn from(handle: &SpawnHandle) -> Self {
        Self::Handle(handle.clone())
    }
}

impl From<Vec<SpawnHandle>> for JoinTarget {
    fn from(handles: Vec<SpawnHandle>) -> Self {
        Self::Handles(handles)
    }
}

impl From<&[SpawnHandle]> for JoinTarget {
    fn from(handles: &[SpawnHandle]) -> Self {
        Self::Handles(handles.to_vec())
    }
}

impl From<ExecutionResult> for JoinTarget {
    fn from(result: ExecutionResult) -> Self {
        Self::Settled(result)
    }
}

impl From<Vec<ExecutionResult>> for JoinTarget {
    fn from(results: Vec<ExecutionResult>) -> Self {
        Self::SettledMany(results)
    }
}

/// Output of [`ProgramRuntime::join`], shaped like its input.
#[derive(Debug, Clone, PartialEq)]
pub enum Joined {
    One(ExecutionResult),
    Many(Vec<ExecutionResult>),
}

impl Joined {
    pub fn into_vec(self) -> Vec<ExecutionResult> {
        match self {
            Self::One(result) => vec![result],
            Self::Many(results) => results,
        }
    }

    pub fn into_one(self) -> Option<ExecutionResult> {
        match self {
            Self::One(result) => Some(result),
            Self::Many(_) => None,
        }
    }
}

/// Tasks for [`ProgramRuntime::parallel`] and [`ProgramRuntime::sequence`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub label: Option<String>,
    pub inputs: Vec<TaskSpec>,
}

impl Batch {
    pub fn new(inputs: Vec<TaskSpec>) -> Self {
        Self {
            label: None,
            inputs,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn name(&self, default: &str) -> String {
        self.label.clone().unwrap_or_else(|| default.to_string())
    }

    fn validate(&self, kind: &str) -> Result<(), RunError> {
        if self.inputs.is_empty() {
            return Err(RunError::invalid_input(format!(
                "{kind} requires at least one task"
            )));
        }
        for (index, input) in self.inputs.iter().enumerate() {
            input.validate().map_err(|e| {
                RunError::invalid_input(format!("{kind} task {} ({}): {}", index + 1, input.agent, e.message))
            })?;
        }
        Ok(())
    }
}

impl From<Vec<TaskSpec>> for Batch {
    fn from(inputs: Vec<TaskSpec>) -> Self {
        Self::new(inputs)
    }
}

impl From<(&str, Vec<TaskSpec>)> for Batch {
    fn from((label, inputs): (&str, Vec<TaskSpec>)) -> Self {
        Self::new(inputs).with_label(label)
    }
}

impl From<(String, Vec<TaskSpec>)> for Batch {
    fn from((label, inputs): (String, Vec<TaskSpec>)) -> Self {
        Self::new(inputs).with_label(label)
    }
}

/// What [`ProgramRuntime::shutdown`] waited for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether running tasks were asked to stop.
    pub cancel_requested: bool,
    /// Tasks that were still active and got awaited.
    pub awaited: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl ShutdownReport {
    fn record(&mut self, outcome: &Result<ExecutionResult, RunError>) {
        self.awaited += 1;
        match outcome {
            Ok(result) if !result.is_failure() => self.succeeded += 1,
            Err(e) if e.is_cancelled() => self.cancelled += 1,
            _ => self.failed += 1,
        }
    }
}

struct Inner {
    run_id: RunId,
    runner: Arc<dyn TaskRunner>,
    cancel: CancellationToken,
    observer: Observer,
    workspace: Workspace,
    active: Mutex<HashMap<TaskId, SpawnHandle>>,
    results: Mutex<Vec<ExecutionResult>>,
    on_summary: OnceLock<SummaryFn>,
}

impl Inner {
    fn update(&self, index: usize, result: ExecutionResult) {
        let snapshot = {
            let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = results.get_mut(index) {
                *slot = result;
            }
            results.clone()
        };
        if let Some(on_summary) = self.on_summary.get() {
            on_summary(snapshot);
        }
    }

    fn settle(&self, index: usize, task_id: &TaskId, outcome: &Result<ExecutionResult, RunError>) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);

        let settled = match outcome {
            Ok(result) => {
                debug!(run_id = %self.run_id, %task_id, exit_code = result.exit_code, "Task settled");
                result.clone()
            }
            Err(e) => {
                debug!(run_id = %self.run_id, %task_id, error = %e, "Task ended without a result");
                let current = self.results.lock().unwrap_or_else(PoisonError::into_inner);
                let Some(mut result) = current.get(index).cloned() else {
                    return;
                };
                drop(current);
                result.error_message = Some(e.message.clone());
                if e.is_cancelled() {
                    result.stop_reason.get_or_insert_with(|| "aborted".to_string());
                }
                result.settle(1);
                result
            }
        };
        self.update(index, settled);
    }
}

/// Façade bound to one run for spawning and coordinating tasks.
#[derive(Clone)]
pub struct ProgramRuntime {
    inner: Arc<Inner>,
}

impl ProgramRuntime {
    /// Create a runtime whose token is a child of `parent`.
    ///
    /// Workspaces live under the run's artifacts directory when it has one,
    /// otherwise under the system temp directory.
    pub fn new(
        run_id: RunId,
        runner: Arc<dyn TaskRunner>,
        parent: &CancellationToken,
        store: Arc<ObservabilityStore>,
    ) -> Self {
        let workspace_root = match store.artifacts_dir(&run_id) {
            Some(dir) => dir.join("workspace"),
            None => std::env::temp_dir().join(format!("subagent-workspace-{run_id}")),
        };
        Self {
            inner: Arc::new(Inner {
                observer: Observer::new(run_id.clone(), store),
                workspace: Workspace::new(workspace_root),
                run_id,
                runner,
                cancel: parent.child_token(),
                active: Mutex::new(HashMap::new()),
                results: Mutex::new(Vec::new()),
                on_summary: OnceLock::new(),
            }),
        }
    }

    /// Register the callback receiving task state changes. Only the first
    /// registration takes effect.
    pub fn on_summary(&self, callback: SummaryFn) -> bool {
        self.inner.on_summary.set(callback).is_ok()
    }

    pub fn run_id(&self) -> &RunId {
        &self.inner.run_id
    }

    /// Token shared by every task of this runtime.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn observe(&self) -> &Observer {
        &self.inner.observer
    }

    pub fn workspace(&self) -> &Workspace {
        &self.inner.workspace
    }

    /// Latest state of every task spawned so far, in spawn order.
    pub fn results(&self) -> Vec<ExecutionResult> {
        self.inner
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of tasks that have not settled yet.
    pub fn active_count(&self) -> usize {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Start a task. It runs whether or not anyone joins it.
    pub fn spawn(&self, input: TaskSpec) -> Result<SpawnHandle, RunError> {
        self.spawn_inner(input, None)
    }

    /// Start a task that is also cancelled when `signal` trips.
    pub fn spawn_with_signal(
        &self,
        input: TaskSpec,
        signal: CancellationToken,
    ) -> Result<SpawnHandle, RunError> {
        self.spawn_inner(input, Some(signal))
    }

    fn spawn_inner(
        &self,
        input: TaskSpec,
        signal: Option<CancellationToken>,
    ) -> Result<SpawnHandle, RunError> {
        input.validate()?;

        let task_id = TaskId::generate();
        let token = self.inner.cancel.child_token();
        if let Some(signal) = signal {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = signal.cancelled() => token.cancel(),
                    _ = token.cancelled() => {}
                }
            });
        }

        let index = {
            let mut results = self.inner.results.lock().unwrap_or_else(PoisonError::into_inner);
            results.push(ExecutionResult::pending(task_id.clone(), &input));
            results.len() - 1
        };
        info!(run_id = %self.inner.run_id, %task_id, agent = %input.agent, "Spawning task");

        let progress: ProgressFn = {
            let inner: Weak<Inner> = Arc::downgrade(&self.inner);
            Arc::new(move |snapshot| {
                if let Some(inner) = inner.upgrade() {
                    inner.update(index, snapshot);
                }
            })
        };

        let agent = input.agent.clone();
        let future: TaskFuture = {
            let inner = self.inner.clone();
            let task_id = task_id.clone();
            async move {
                let outcome = inner
                    .runner
                    .run(task_id.clone(), &input, token.clone(), Some(progress))
                    .await;
                // Releases the per-call signal relay.
                token.cancel();
                inner.settle(index, &task_id, &outcome);
                outcome
            }
            .boxed()
            .shared()
        };

        let handle = SpawnHandle {
            task_id: task_id.clone(),
            agent,
            result: future.clone(),
        };
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id, handle.clone());
        tokio::spawn(future);
        Ok(handle)
    }

    /// Wait for one handle or a list of handles.
    ///
    /// Passing a settled result instead of a handle is rejected with
    /// `INVALID_INPUT`. Joining a list fails with the first error in list
    /// order once every task has settled.
    pub async fn join(&self, target: impl Into<JoinTarget>) -> Result<Joined, RunError> {
        match target.into() {
            JoinTarget::Handle(handle) => handle.join().await.map(Joined::One),
            JoinTarget::Handles(handles) => {
                let outcomes = join_all(handles.iter().map(SpawnHandle::join)).await;
                outcomes
                    .into_iter()
                    .collect::<Result<Vec<_>, _>>()
                    .map(Joined::Many)
            }
            JoinTarget::Settled(_) | JoinTarget::SettledMany(_) => {
                warn!(run_id = %self.inner.run_id, "join() called with a settled result");
                Err(RunError::invalid_input(JOIN_SETTLED_HINT))
            }
        }
    }

    /// Spawn every input at once and wait for all of them.
    ///
    /// Results come back in input order.
    pub async fn parallel(&self, batch: impl Into<Batch>) -> Result<Vec<ExecutionResult>, RunError> {
        let batch = batch.into();
        batch.validate("parallel")?;
        let label = batch.name("parallel");
        let observer = self.observe();
        observer.log(
            EventKind::Info,
            format!("{label}: starting {} tasks", batch.inputs.len()),
            Some(serde_json::json!({ "label": label, "mode": "parallel", "count": batch.inputs.len() })),
        );

        let mut handles = Vec::with_capacity(batch.inputs.len());
        for (index, input) in batch.inputs.into_iter().enumerate() {
            let handle = self.spawn(input)?;
            observer.log(
                EventKind::Info,
                format!("{label}: spawned {} ({})", handle.agent(), handle.task_id()),
                Some(serde_json::json!({ "label": label, "index": index, "taskId": handle.task_id() })),
            );
            handles.push(handle);
        }

        let outcomes = join_all(handles.iter().map(SpawnHandle::join)).await;
        let mut results = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(result) => {
                    log_result(observer, &label, index, &result);
                    results.push(result);
                }
                Err(e) => {
                    observer.log(EventKind::Warning, format!("{label}: task {} {e}", index + 1), None);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        log_done(observer, &label, &results);
        Ok(results)
    }

    /// Run every input one after another, in order.
    ///
    /// Failed tasks do not stop the sequence; cancellation does.
    pub async fn sequence(&self, batch: impl Into<Batch>) -> Result<Vec<ExecutionResult>, RunError> {
        let batch = batch.into();
        batch.validate("sequence")?;
        let label = batch.name("sequence");
        let observer = self.observe();
        observer.log(
            EventKind::Info,
            format!("{label}: starting {} tasks", batch.inputs.len()),
            Some(serde_json::json!({ "label": label, "mode": "sequence", "count": batch.inputs.len() })),
        );

        let mut results = Vec::with_capacity(batch.inputs.len());
        for (index, input) in batch.inputs.into_iter().enumerate() {
            let handle = self.spawn(input)?;
            observer.log(
                EventKind::Info,
                format!("{label}: spawned {} ({})", handle.agent(), handle.task_id()),
                Some(serde_json::json!({ "label": label, "index": index, "taskId": handle.task_id() })),
            );
            let result = handle.join().await?;
            log_result(observer, &label, index, &result);
            results.push(result);
        }

        log_done(observer, &label, &results);
        Ok(results)
    }

    /// Wait until no task of this runtime is running.
    ///
    /// With `cancel_running`, the runtime token is tripped first, so every
    /// active task is asked to stop and later spawns are cancelled at once.
    pub async fn shutdown(&self, cancel_running: bool) -> ShutdownReport {
        if cancel_running {
            self.inner.cancel.cancel();
        }

        let mut report = ShutdownReport {
            cancel_requested: cancel_running,
            ..Default::default()
        };
        loop {
            let handles: Vec<SpawnHandle> = self
                .inner
                .active
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect();
            if handles.is_empty() {
                break;
            }
            for outcome in join_all(handles.iter().map(SpawnHandle::join)).await {
                report.record(&outcome);
            }
        }

        info!(
            run_id = %self.inner.run_id,
            cancel_requested = report.cancel_requested,
            awaited = report.awaited,
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.cancelled,
            "Runtime shut down"
        );
        report
    }
}

impl std::fmt::Debug for ProgramRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramRuntime")
            .field("run_id", &self.inner.run_id)
            .field("active", &self.active_count())
            .finish()
    }
}

fn log_result(observer: &Observer, label: &str, index: usize, result: &ExecutionResult) {
    let kind = if result.is_failure() {
        EventKind::Warning
    } else {
        EventKind::Info
    };
    observer.log(
        kind,
        format!("{label}: {} finished with exit code {}", result.agent, result.exit_code),
        Some(serde_json::json!({
            "label": label,
            "index": index,
            "taskId": result.task_id,
            "exitCode": result.exit_code,
            "turns": result.usage.turns,
        })),
    );
}

fn log_done(observer: &Observer, label: &str, results: &[ExecutionResult]) {
    let failed = results.iter().filter(|r| r.is_failure()).count();
    observer.log(
        EventKind::Info,
        format!("{label}: done ({} tasks, {failed} failed)", results.len()),
        Some(serde_json::json!({ "label": label, "count": results.len(), "failed": failed })),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{task, FakeRunner};
    use subagent_core::ErrorCode;

    fn runtime(runner: Arc<FakeRunner>, parent: &CancellationToken) -> (ProgramRuntime, Arc<ObservabilityStore>) {
        let store = Arc::new(ObservabilityStore::default());
        let run_id = RunId::new("run-test");
        store.create_run(&run_id, false, &std::env::temp_dir());
        (ProgramRuntime::new(run_id, runner, parent, store.clone()), store)
    }

    async fn wait_running(runner: &FakeRunner, count: usize) {
        while runner.running() < count {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_spawn_requires_model() {
        let runner = Arc::new(FakeRunner::new());
        let (runtime, _) = runtime(runner.clone(), &CancellationToken::new());

        let err = runtime.spawn(TaskSpec::new("scout", "x", "")).unwrap_err();

        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert_eq!(runner.invocations(), 0);
        assert!(runtime.results().is_empty());
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let runner = Arc::new(FakeRunner::new());
        let (runtime, _) = runtime(runner.clone(), &CancellationToken::new());

        let handle = runtime.spawn(task("scout", "find TODOs")).unwrap();
        let first = runtime.join(&handle).await.unwrap().into_one().unwrap();
        let second = runtime.join(handle.clone()).await.unwrap().into_one().unwrap();

        assert_eq!(first, second);
        assert_eq!(first.exit_code, 0);
        assert_eq!(runner.invocations(), 1);
        assert!(handle.peek().is_some());
        assert_eq!(runtime.active_count(), 0);
    }

    #[tokio::test]
    async fn test_join_rejects_settled_result() {
        let runner = Arc::new(FakeRunner::new());
        let (runtime, _) = runtime(runner, &CancellationToken::new());

        let handle = runtime.spawn(task("scout", "find TODOs")).unwrap();
        let result = runtime.join(&handle).await.unwrap().into_one().unwrap();

        let err = runtime.join(result.clone()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.recoverable);
        assert!(err.message.contains("pass the handle returned by spawn()"));

        let err = runtime.join(vec![result]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_join_many_keeps_order() {
        let runner = Arc::new(FakeRunner::new());
        let (runtime, _) = runtime(runner, &CancellationToken::new());

        let slow = runtime.spawn(task("slow", "a [sleep=40]")).unwrap();
        let fast = runtime.spawn(task("fast", "b")).unwrap();
        let joined = runtime.join(vec![slow, fast]).await.unwrap().into_vec();

        let agents: Vec<&str> = joined.iter().map(|r| r.agent.as_str()).collect();
        assert_eq!(agents, vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn test_parallel_and_sequence() {
        let runner = Arc::new(FakeRunner::new());
        let (runtime, store) = runtime(runner.clone(), &CancellationToken::new());

        let results = runtime
            .parallel(("scan", vec![task("a", "one [sleep=20]"), task("b", "[fail]")]))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].exit_code, 1);

        let results = runtime
            .sequence(vec![task("c", "three"), task("d", "four")])
            .await
            .unwrap();
        assert_eq!(results[1].final_output(), "done: four");
        assert_eq!(runner.seen_tasks()[2..], ["three".to_string(), "four".to_string()]);

        let events = store.to_summary(runtime.run_id()).unwrap().events;
        let messages: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages[0], "scan: starting 2 tasks");
        assert!(messages.contains(&"scan: done (2 tasks, 1 failed)"));
        assert!(messages.contains(&"sequence: done (2 tasks, 0 failed)"));
        assert_eq!(runtime.results().len(), 4);
    }

    #[tokio::test]
    async fn test_parallel_validates_before_spawning() {
        let runner = Arc::new(FakeRunner::new());
        let (runtime, _) = runtime(runner.clone(), &CancellationToken::new());

        let err = runtime
            .parallel(vec![task("a", "ok"), TaskSpec::new("b", "x", "")])
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        let err = runtime.sequence(Vec::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert_eq!(runner.invocations(), 0);
    }

    #[tokio::test]
    async fn test_per_call_signal_cancels_only_its_task() {
        let runner = Arc::new(FakeRunner::new());
        let (runtime, _) = runtime(runner.clone(), &CancellationToken::new());
        let signal = CancellationToken::new();

        let doomed = runtime.spawn_with_signal(task("a", "[hang]"), signal.clone()).unwrap();
        let survivor = runtime.spawn(task("b", "[sleep=30]")).unwrap();
        wait_running(&runner, 2).await;
        signal.cancel();

        assert!(doomed.join().await.unwrap_err().is_cancelled());
        assert_eq!(survivor.join().await.unwrap().exit_code, 0);

        let results = runtime.results();
        assert_eq!(results[0].exit_code, 1);
        assert_eq!(results[0].stop_reason.as_deref(), Some("aborted"));
    }

    #[tokio::test]
    async fn test_parent_token_cancels_tasks() {
        let runner = Arc::new(FakeRunner::new());
        let parent = CancellationToken::new();
        let (runtime, _) = runtime(runner.clone(), &parent);

        let handle = runtime.spawn(task("a", "[hang]")).unwrap();
        wait_running(&runner, 1).await;
        parent.cancel();

        assert!(runtime.join(&handle).await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_active_tasks() {
        let runner = Arc::new(FakeRunner::new());
        let (runtime, _) = runtime(runner.clone(), &CancellationToken::new());

        runtime.spawn(task("a", "[sleep=30]")).unwrap();
        runtime.spawn(task("b", "[fail]")).unwrap();
        let report = runtime.shutdown(false).await;

        assert!(!report.cancel_requested);
        assert_eq!(report.awaited, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(runtime.active_count(), 0);
        assert_eq!(runner.running(), 0);
        assert!(runtime.results().iter().all(|r| !r.is_running()));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_tasks() {
        let runner = Arc::new(FakeRunner::new());
        let (runtime, _) = runtime(runner.clone(), &CancellationToken::new());

        runtime.spawn(task("a", "[hang]")).unwrap();
        runtime.spawn(task("b", "[hang]")).unwrap();
        wait_running(&runner, 2).await;

        let report = runtime.shutdown(true).await;

        assert!(report.cancel_requested);
        assert_eq!(report.awaited, 2);
        assert_eq!(report.cancelled, 2);
        assert_eq!(runner.running(), 0);
        assert!(runtime.spawn(task("c", "late [hang]")).unwrap().join().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_summary_callback_sees_progress() {
        let runner = Arc::new(FakeRunner::new());
        let (runtime, _) = runtime(runner, &CancellationToken::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        assert!(runtime.on_summary(Arc::new(move |results| sink.lock().unwrap().push(results))));

        let handle = runtime.spawn(task("a", "one")).unwrap();
        handle.join().await.unwrap();

        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].exit_code, 0);
    }
}
