//! Top-level runs and their persisted `run.json` snapshot.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ContentBlock, CoreError, ExecutionResult, Message, ObservabilityEvent, RunError, RunId,
    RunStatus, TaskId, Usage,
};

/// Observability view of a run: bounded event window plus artifact list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilitySummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub events: Vec<ObservabilityEvent>,
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
}

/// A top-level orchestration unit wrapping one or more tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Description of what the run does (the task text, or a topology label).
    pub task: String,
    pub results: Vec<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub observability: ObservabilitySummary,
}

impl RunRecord {
    /// Create a running record.
    pub fn new(run_id: RunId, task: impl Into<String>) -> Self {
        Self {
            run_id,
            status: RunStatus::Running,
            task: task.into(),
            results: Vec::new(),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            observability: ObservabilitySummary::default(),
        }
    }

    fn finish(&mut self, status: RunStatus) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the run as done with its final results.
    pub fn complete(&mut self, results: Vec<ExecutionResult>) -> Result<(), CoreError> {
        self.finish(RunStatus::Done)?;
        self.results = results;
        Ok(())
    }

    /// Mark the run as failed. Tasks still running are settled as aborted.
    pub fn fail(&mut self, error: RunError) -> Result<(), CoreError> {
        self.finish(RunStatus::Failed)?;
        self.abort_pending(&error.message);
        self.error = Some(error);
        Ok(())
    }

    /// Mark the run as cancelled. Tasks still running are settled as aborted.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), CoreError> {
        self.finish(RunStatus::Cancelled)?;
        let error = RunError::cancelled(reason);
        self.abort_pending(&error.message);
        self.error = Some(error);
        Ok(())
    }

    /// Settle every result that is still running. Returns how many changed.
    pub fn abort_pending(&mut self, reason: &str) -> usize {
        self.results
            .iter_mut()
            .map(|result| result.abort(reason))
            .filter(|aborted| *aborted)
            .count()
    }

    /// Sum of every task's usage.
    pub fn total_usage(&self) -> Usage {
        let mut total = Usage::default();
        for result in &self.results {
            total.add(&result.usage);
        }
        total
    }
}

/// Per-task entry of `run.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub agent: String,
    pub task: String,
    pub model: String,
    pub exit_code: i32,
    pub text: String,
    #[serde(default)]
    pub session_path: Option<PathBuf>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl From<&ExecutionResult> for ResultSnapshot {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            task_id: Some(result.task_id.clone()),
            agent: result.agent.clone(),
            task: result.task.clone(),
            model: result.model.clone(),
            exit_code: result.exit_code,
            text: result.final_output(),
            session_path: result.session_path.clone(),
            usage: result.usage.clone(),
            step: result.step,
            stop_reason: result.stop_reason.clone(),
        }
    }
}

impl ResultSnapshot {
    /// Rebuild a settled result. The transcript is reduced to the final text.
    pub fn to_result(&self) -> ExecutionResult {
        let messages = if self.text.is_empty() {
            Vec::new()
        } else {
            vec![Message {
                role: "assistant".to_string(),
                content: vec![ContentBlock::Text {
                    text: self.text.clone(),
                }],
                usage: None,
                stop_reason: self.stop_reason.clone(),
                error_message: None,
                model: None,
            }]
        };
        ExecutionResult {
            task_id: self.task_id.clone().unwrap_or_else(TaskId::generate),
            agent: self.agent.clone(),
            task: self.task.clone(),
            exit_code: self.exit_code,
            messages,
            usage: self.usage.clone(),
            stderr: String::new(),
            model: self.model.clone(),
            stop_reason: self.stop_reason.clone(),
            error_message: None,
            session_path: self.session_path.clone(),
            step: self.step,
        }
    }
}

/// Durable snapshot written as `run.json` when a run reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub status: RunStatus,
    pub task: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub results: Vec<ResultSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl RunSnapshot {
    /// Capture a record.
    pub fn from_record(record: &RunRecord) -> Self {
        Self {
            run_id: record.run_id.clone(),
            status: record.status,
            task: record.task.clone(),
            started_at: record.started_at,
            completed_at: record.completed_at,
            results: record.results.iter().map(ResultSnapshot::from).collect(),
            error: record.error.clone(),
        }
    }

    /// Rebuild a read-only record from the snapshot.
    pub fn to_record(&self) -> RunRecord {
        RunRecord {
            run_id: self.run_id.clone(),
            status: self.status,
            task: self.task.clone(),
            results: self.results.iter().map(ResultSnapshot::to_result).collect(),
            error: self.error.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            observability: ObservabilitySummary::default(),
        }
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TaskSpec, EXIT_RUNNING};

    fn finished_result(text: &str) -> ExecutionResult {
        let spec = TaskSpec::new("scout", "find TODOs", "m1");
        let mut result = ExecutionResult::pending(TaskId::new("t-1"), &spec);
        result.record_message(Message {
            role: "assistant".to_string(),
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
            usage: None,
            stop_reason: Some("stop".to_string()),
            error_message: None,
            model: None,
        });
        result.settle(0);
        result
    }

    #[test]
    fn test_terminal_transition_happens_once() {
        let mut record = RunRecord::new(RunId::new("run-1"), "task");
        record.complete(vec![]).unwrap();
        assert!(record.cancel("late").is_err());
        assert!(record.fail(RunError::runtime("late")).is_err());
        assert_eq!(record.status, RunStatus::Done);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_cancel_settles_running_tasks() {
        let mut record = RunRecord::new(RunId::new("run-3"), "batch");
        let spec = TaskSpec::new("scout", "find TODOs", "m1");
        record.results = vec![
            finished_result("done"),
            ExecutionResult::pending(TaskId::new("t-2"), &spec),
        ];

        record.cancel("stopped by user").unwrap();

        assert_eq!(record.results[0].exit_code, 0);
        assert_eq!(record.results[1].exit_code, 1);
        assert_eq!(record.results[1].stop_reason.as_deref(), Some("aborted"));
        assert_eq!(record.results[1].error_message.as_deref(), Some("stopped by user"));
        let snapshot = RunSnapshot::from_record(&record);
        assert!(snapshot.results.iter().all(|r| r.exit_code != EXIT_RUNNING));
    }

    #[test]
    fn test_snapshot_json_shape() {
        let mut record = RunRecord::new(RunId::new("run-1"), "find TODOs");
        record.complete(vec![finished_result("3 TODOs")]).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&RunSnapshot::from_record(&record).to_json().unwrap()).unwrap();
        assert_eq!(json["runId"], "run-1");
        assert_eq!(json["status"], "done");
        assert_eq!(json["results"][0]["exitCode"], 0);
        assert_eq!(json["results"][0]["text"], "3 TODOs");
        assert_eq!(json["results"][0]["usage"]["turns"], 1);
        assert!(json["results"][0]["sessionPath"].is_null());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_snapshot_round_trip_through_record() {
        let mut record = RunRecord::new(RunId::new("run-2"), "chain");
        record.complete(vec![finished_result("done")]).unwrap();
        let snapshot = RunSnapshot::from_record(&record);

        let parsed = RunSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        let restored = parsed.to_record();
        assert_eq!(RunSnapshot::from_record(&restored), snapshot);
        assert_eq!(restored.results[0].final_output(), "done");
    }
}
