//! Task specification submitted to the executor.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::RunError;

/// Placeholder substituted with the previous step's output in chains.
pub const PREVIOUS_PLACEHOLDER: &str = "{previous}";

/// An executable unit of work. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Name of the agent profile running the task.
    pub agent: String,

    /// Optional system prompt; passed to the launcher through a private file.
    #[serde(default)]
    pub system_prompt: String,

    /// Task description handed to the launcher.
    pub task: String,

    /// Working directory of the subprocess.
    #[serde(default = "default_cwd")]
    pub cwd: PathBuf,

    /// Model selector. Required; validated before any process is spawned.
    #[serde(default)]
    pub model: String,

    /// Tool allow-list.
    #[serde(default)]
    pub tools: Vec<String>,

    /// Position inside a chain, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,

    /// Where the launcher should write its session file, if anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_path: Option<PathBuf>,
}

fn default_cwd() -> PathBuf {
    PathBuf::from(".")
}

impl TaskSpec {
    /// Create a new TaskSpec with the required fields.
    pub fn new(agent: impl Into<String>, task: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            system_prompt: String::new(),
            task: task.into(),
            cwd: default_cwd(),
            model: model.into(),
            tools: Vec::new(),
            step: None,
            session_path: None,
        }
    }

    /// Builder method to set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Builder method to set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Builder method to set the tool allow-list.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to set the chain step index.
    pub fn with_step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }

    /// Builder method to request a session file.
    pub fn with_session_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_path = Some(path.into());
        self
    }

    /// Check the invariants that must hold before a process is spawned.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.model.trim().is_empty() {
            return Err(RunError::invalid_input(format!(
                "task for agent '{}' has no model; every task must name a model",
                self.agent
            )));
        }
        if self.task.trim().is_empty() {
            return Err(RunError::invalid_input(format!(
                "task for agent '{}' has an empty description",
                self.agent
            )));
        }
        Ok(())
    }

    /// Returns a copy with every `{previous}` replaced by `previous`.
    pub fn with_previous_output(&self, previous: &str) -> Self {
        let mut spec = self.clone();
        spec.task = spec.task.replace(PREVIOUS_PLACEHOLDER, previous);
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_model() {
        let spec = TaskSpec::new("scout", "find TODOs", "");
        let err = spec.validate().unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::InvalidInput);

        let spec = TaskSpec::new("scout", "find TODOs", "   ");
        assert!(spec.validate().is_err());

        assert!(TaskSpec::new("scout", "find TODOs", "m1").validate().is_ok());
    }

    #[test]
    fn test_previous_substitutes_every_occurrence() {
        let spec = TaskSpec::new("writer", "summarize {previous}; then cite {previous}", "m1");
        let next = spec.with_previous_output("X");
        assert_eq!(next.task, "summarize X; then cite X");
        assert_eq!(spec.task, "summarize {previous}; then cite {previous}");
    }

    #[test]
    fn test_deserialize_defaults() {
        let spec: TaskSpec =
            serde_json::from_str(r#"{"agent":"scout","task":"look around"}"#).unwrap();
        assert_eq!(spec.cwd, PathBuf::from("."));
        assert!(spec.model.is_empty());
        assert!(spec.validate().is_err());
    }
}
