//! In-process `TaskRunner` double used by the orchestration tests.
//!
//! Behaviour is driven by markers in the task text:
//! `[sleep=N]` waits N milliseconds, `[hang]` waits until cancelled and
//! `[fail]` settles with exit code 1. `[silent]` succeeds without output.
//! Everything else succeeds with the output `done: <task>`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use subagent_core::{ContentBlock, ExecutionResult, Message, MessageUsage, RunError, TaskId, TaskSpec};
use subagent_launcher::{ProgressFn, TaskRunner};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub(crate) struct FakeRunner {
    invocations: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<TaskSpec>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Task texts in the order the runner received them.
    pub(crate) fn seen_tasks(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|s| s.task.clone()).collect()
    }

    async fn simulate(
        &self,
        task_id: TaskId,
        spec: &TaskSpec,
        cancel: &CancellationToken,
        progress: Option<ProgressFn>,
    ) -> Result<ExecutionResult, RunError> {
        let mut result = ExecutionResult::pending(task_id, spec);

        let delay = marker(&spec.task, "sleep")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or_default();
        let hang = spec.task.contains("[hang]");
        let wait = async {
            if hang {
                std::future::pending::<()>().await;
            } else {
                tokio::time::sleep(delay).await;
            }
        };

        tokio::select! {
            _ = wait => {}
            _ = cancel.cancelled() => {
                return Err(RunError::cancelled(format!("task {} was cancelled", result.task_id)));
            }
        }

        if spec.task.contains("[fail]") {
            result.stderr = "boom".to_string();
            result.settle(1);
            return Ok(result);
        }

        if spec.task.contains("[silent]") {
            result.settle(0);
            return Ok(result);
        }

        result.record_message(assistant(&format!("done: {}", spec.task)));
        if let Some(progress) = &progress {
            progress(result.clone());
        }
        result.settle(0);
        Ok(result)
    }
}

#[async_trait]
impl TaskRunner for FakeRunner {
    async fn run(
        &self,
        task_id: TaskId,
        spec: &TaskSpec,
        cancel: CancellationToken,
        progress: Option<ProgressFn>,
    ) -> Result<ExecutionResult, RunError> {
        spec.validate()?;
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(spec.clone());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let outcome = self.simulate(task_id, spec, &cancel, progress).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

pub(crate) fn assistant(text: &str) -> Message {
    Message {
        role: "assistant".to_string(),
        content: vec![ContentBlock::Text {
            text: text.to_string(),
        }],
        usage: Some(MessageUsage {
            input: 10,
            output: 5,
            total_tokens: 15,
            ..Default::default()
        }),
        stop_reason: None,
        error_message: None,
        model: None,
    }
}

pub(crate) fn task(agent: &str, text: &str) -> TaskSpec {
    TaskSpec::new(agent, text, "m1")
}

fn marker<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let start = text.find(&format!("[{name}="))? + name.len() + 2;
    let len = text[start..].find(']')?;
    Some(&text[start..start + len])
}
