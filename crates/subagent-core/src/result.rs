//! Outcome of one task execution.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Message, TaskId, TaskSpec, Usage};

/// Exit code of a task whose process has not settled yet.
pub const EXIT_RUNNING: i32 = -1;

/// Outcome of one task.
///
/// Built up by the executor while events arrive; listeners only ever see
/// cloned snapshots. Once `exit_code != -1` the value is final.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub agent: String,
    pub task: String,
    /// -1 while running, 0 on success, >0 on failure.
    pub exit_code: i32,
    pub messages: Vec<Message>,
    pub usage: Usage,
    pub stderr: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
}

impl ExecutionResult {
    /// Create an in-progress result for the given task.
    pub fn pending(task_id: TaskId, spec: &TaskSpec) -> Self {
        Self {
            task_id,
            agent: spec.agent.clone(),
            task: spec.task.clone(),
            exit_code: EXIT_RUNNING,
            messages: Vec::new(),
            usage: Usage::default(),
            stderr: String::new(),
            model: spec.model.clone(),
            stop_reason: None,
            error_message: None,
            session_path: None,
            step: spec.step,
        }
    }

    /// Returns true while the process has not settled.
    pub fn is_running(&self) -> bool {
        self.exit_code == EXIT_RUNNING
    }

    /// Record the final exit code. Only the first settlement is kept.
    pub fn settle(&mut self, exit_code: i32) -> bool {
        if !self.is_running() {
            return false;
        }
        // -1 is reserved for "running"; a signal-terminated process is a failure.
        self.exit_code = if exit_code < 0 { 1 } else { exit_code };
        true
    }

    /// Settle a result whose task was stopped before its process finished.
    ///
    /// Marks it `aborted` with exit code 1. Settled results are left alone.
    pub fn abort(&mut self, reason: &str) -> bool {
        if !self.is_running() {
            return false;
        }
        self.stop_reason.get_or_insert_with(|| "aborted".to_string());
        if self.error_message.is_none() {
            self.error_message = Some(reason.to_string());
        }
        self.settle(1)
    }

    /// Fold a completed message into the result.
    pub fn record_message(&mut self, message: Message) {
        if message.is_assistant() {
            self.usage.record_turn(message.usage.as_ref());
            if let Some(model) = message.model.as_ref().filter(|m| !m.is_empty()) {
                self.model = model.clone();
            }
            if message.stop_reason.is_some() {
                self.stop_reason = message.stop_reason.clone();
            }
            if message.error_message.is_some() {
                self.error_message = message.error_message.clone();
            }
        }
        self.messages.push(message);
    }

    /// Last non-empty assistant text, or an empty string.
    pub fn final_output(&self) -> String {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.is_assistant())
            .map(Message::text)
            .find(|text| !text.trim().is_empty())
            .unwrap_or_default()
    }

    /// Whether this task counts as failed.
    ///
    /// Either a non-zero exit or an `error`/`aborted` stop reason is enough.
    /// Launchers that exit 0 while reporting an error stop reason are logged.
    pub fn is_failure(&self) -> bool {
        let bad_exit = self.exit_code != 0;
        let bad_stop = matches!(self.stop_reason.as_deref(), Some("error" | "aborted"));
        if bad_stop && self.exit_code == 0 {
            warn!(
                task_id = %self.task_id,
                agent = %self.agent,
                stop_reason = ?self.stop_reason,
                "launcher exited 0 but reported a failing stop reason"
            );
        }
        bad_exit || bad_stop
    }

    /// Short description of why the task failed.
    pub fn failure_message(&self) -> String {
        if let Some(msg) = self.error_message.as_ref().filter(|m| !m.is_empty()) {
            return msg.clone();
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.lines().last().unwrap_or(stderr).to_string();
        }
        match self.stop_reason.as_deref() {
            Some(reason) if reason == "error" || reason == "aborted" => {
                format!("task stopped with reason '{reason}'")
            }
            _ => format!("task exited with code {}", self.exit_code),
        }
    }
}
