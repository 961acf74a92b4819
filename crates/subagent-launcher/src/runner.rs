//! The seam between orchestration code and whatever actually runs a task.

use std::sync::Arc;

use async_trait::async_trait;
use subagent_core::{ExecutionResult, RunError, TaskId, TaskSpec};
use tokio_util::sync::CancellationToken;

/// Callback receiving a snapshot of an in-progress result after each event.
pub type ProgressFn = Arc<dyn Fn(ExecutionResult) + Send + Sync>;

/// Runs one task to completion.
///
/// Implemented by [`crate::LauncherExecutor`] for real subprocesses; tests
/// and embedders can substitute their own implementation.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run `spec` under `task_id`.
    ///
    /// Returns the settled result for both successful and failed tasks.
    /// `Err` is reserved for invalid input and cancellation.
    async fn run(
        &self,
        task_id: TaskId,
        spec: &TaskSpec,
        cancel: CancellationToken,
        progress: Option<ProgressFn>,
    ) -> Result<ExecutionResult, RunError>;
}

#[async_trait]
impl<T: TaskRunner + ?Sized> TaskRunner for Arc<T> {
    async fn run(
        &self,
        task_id: TaskId,
        spec: &TaskSpec,
        cancel: CancellationToken,
        progress: Option<ProgressFn>,
    ) -> Result<ExecutionResult, RunError> {
        (**self).run(task_id, spec, cancel, progress).await
    }
}
