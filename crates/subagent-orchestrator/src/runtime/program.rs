//! Declarative orchestration programs.
//!
//! A program is a list of instructions executed in order against a
//! [`ProgramRuntime`]. Instructions bind names to task handles, settled
//! results or workspace paths, and later instructions refer to them.
//!
//! ```json
//! {
//!   "steps": [
//!     { "op": "workspace", "bind": "notes" },
//!     { "op": "spawn", "bind": "scan", "task": { "agent": "scout", "task": "list TODOs into {workspace:notes}", "model": "m1" } },
//!     { "op": "join", "bind": "found", "handles": ["scan"] },
//!     { "op": "log", "message": "scan finished" }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use subagent_core::{EventKind, ExecutionResult, RunError, TaskSpec};
use tracing::{debug, warn};

use super::{Batch, JoinTarget, ProgramRuntime, SpawnHandle};

const WORKSPACE_PREFIX: &str = "{workspace:";

/// A sequence of orchestration instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub steps: Vec<Instruction>,
}

/// One orchestration instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    /// Start a task and bind its handle.
    Spawn { bind: String, task: TaskSpec },

    /// Wait for previously spawned handles and bind their results.
    Join { bind: String, handles: Vec<String> },

    /// Run tasks concurrently and bind their results.
    Parallel {
        bind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        tasks: Vec<TaskSpec>,
    },

    /// Run tasks one after another and bind their results.
    Sequence {
        bind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        tasks: Vec<TaskSpec>,
    },

    /// Record an observability event.
    Log {
        #[serde(default)]
        level: EventKind,
        message: String,
    },

    /// Write an artifact into the run's artifacts directory.
    Artifact { path: String, content: String },

    /// Create a scratch directory and bind its path.
    Workspace { bind: String },
}

impl Instruction {
    fn op(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Join { .. } => "join",
            Self::Parallel { .. } => "parallel",
            Self::Sequence { .. } => "sequence",
            Self::Log { .. } => "log",
            Self::Artifact { .. } => "artifact",
            Self::Workspace { .. } => "workspace",
        }
    }

    fn binding(&self) -> Option<(&str, BindKind)> {
        match self {
            Self::Spawn { bind, .. } => Some((bind, BindKind::Handle)),
            Self::Join { bind, .. } | Self::Parallel { bind, .. } | Self::Sequence { bind, .. } => {
                Some((bind, BindKind::Results))
            }
            Self::Workspace { bind } => Some((bind, BindKind::Workspace)),
            Self::Log { .. } | Self::Artifact { .. } => None,
        }
    }

    fn tasks(&self) -> &[TaskSpec] {
        match self {
            Self::Spawn { task, .. } => std::slice::from_ref(task),
            Self::Parallel { tasks, .. } | Self::Sequence { tasks, .. } => tasks,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindKind {
    Handle,
    Results,
    Workspace,
}

enum Binding {
    Handle(SpawnHandle),
    Results(Vec<ExecutionResult>),
    Workspace(PathBuf),
}

/// Results bound by a program, by binding name.
pub type ProgramOutput = BTreeMap<String, Vec<ExecutionResult>>;

impl Program {
    /// Parse a program from JSON. Malformed programs are `RUNTIME` errors.
    pub fn from_json(json: &str) -> Result<Self, RunError> {
        serde_json::from_str(json).map_err(|e| RunError::runtime(format!("malformed program: {e}")))
    }

    /// Number of tasks named directly by the program.
    pub fn task_count(&self) -> usize {
        self.steps.iter().map(|step| step.tasks().len()).sum()
    }

    /// Static checks run before any instruction executes.
    ///
    /// Missing models are `INVALID_INPUT`; broken bindings are `RUNTIME`.
    pub fn check(&self) -> Result<(), RunError> {
        if self.steps.is_empty() {
            return Err(RunError::invalid_input("program has no steps"));
        }

        let mut bound: HashMap<&str, BindKind> = HashMap::new();
        for (index, step) in self.steps.iter().enumerate() {
            let position = index + 1;

            for task in step.tasks() {
                task.validate().map_err(|e| {
                    RunError::invalid_input(format!("step {position} ({}): {}", step.op(), e.message))
                })?;
                for name in task_workspace_refs(task) {
                    if bound.get(name) != Some(&BindKind::Workspace) {
                        return Err(RunError::runtime(format!(
                            "step {position} ({}): unknown workspace '{name}'",
                            step.op()
                        )));
                    }
                }
            }

            if let Instruction::Join { handles, .. } = step {
                if handles.is_empty() {
                    return Err(RunError::invalid_input(format!(
                        "step {position} (join): nothing to join"
                    )));
                }
                for name in handles {
                    match bound.get(name.as_str()) {
                        Some(BindKind::Handle | BindKind::Results) => {}
                        Some(BindKind::Workspace) => {
                            return Err(RunError::runtime(format!(
                                "step {position} (join): '{name}' is a workspace, not a task handle"
                            )))
                        }
                        None => {
                            return Err(RunError::runtime(format!(
                                "step {position} (join): unknown binding '{name}'"
                            )))
                        }
                    }
                }
            }

            if let Some((name, kind)) = step.binding() {
                if name.is_empty() {
                    return Err(RunError::runtime(format!(
                        "step {position} ({}): empty binding name",
                        step.op()
                    )));
                }
                if bound.insert(name, kind).is_some() {
                    return Err(RunError::runtime(format!(
                        "step {position} ({}): binding '{name}' defined twice",
                        step.op()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl ProgramRuntime {
    /// Execute `program` step by step.
    ///
    /// Spawned tasks that are never joined keep running; callers finish
    /// with [`shutdown`](Self::shutdown) to wait for them.
    pub async fn execute(&self, program: &Program) -> Result<ProgramOutput, RunError> {
        program.check()?;

        let mut bindings: HashMap<String, Binding> = HashMap::new();
        let mut output = ProgramOutput::new();

        for (index, step) in program.steps.iter().enumerate() {
            debug!(run_id = %self.run_id(), step = index + 1, op = step.op(), "Executing program step");

            match step {
                Instruction::Spawn { bind, task } => {
                    let handle = self.spawn(expand(task, &bindings)?)?;
                    bindings.insert(bind.clone(), Binding::Handle(handle));
                }
                Instruction::Join { bind, handles } => {
                    let joined = self.join(join_target(handles, &bindings)?).await?.into_vec();
                    output.insert(bind.clone(), joined.clone());
                    bindings.insert(bind.clone(), Binding::Results(joined));
                }
                Instruction::Parallel { bind, label, tasks } => {
                    let batch = expand_batch(label, tasks, &bindings)?;
                    let results = self.parallel(batch).await?;
                    output.insert(bind.clone(), results.clone());
                    bindings.insert(bind.clone(), Binding::Results(results));
                }
                Instruction::Sequence { bind, label, tasks } => {
                    let batch = expand_batch(label, tasks, &bindings)?;
                    let results = self.sequence(batch).await?;
                    output.insert(bind.clone(), results.clone());
                    bindings.insert(bind.clone(), Binding::Results(results));
                }
                Instruction::Log { level, message } => {
                    self.observe().log(*level, message.clone(), None);
                }
                Instruction::Artifact { path, content } => {
                    if self.observe().artifact(path, content).is_none() {
                        warn!(run_id = %self.run_id(), path = %path, "Artifact was not written");
                    }
                }
                Instruction::Workspace { bind } => {
                    let path = self.workspace().create(bind)?;
                    bindings.insert(bind.clone(), Binding::Workspace(path));
                }
            }
        }

        Ok(output)
    }
}

fn join_target(names: &[String], bindings: &HashMap<String, Binding>) -> Result<JoinTarget, RunError> {
    let mut handles = Vec::with_capacity(names.len());
    let mut settled = Vec::new();
    for name in names {
        match bindings.get(name) {
            Some(Binding::Handle(handle)) => handles.push(handle.clone()),
            Some(Binding::Results(results)) => settled.extend(results.iter().cloned()),
            Some(Binding::Workspace(_)) | None => {
                return Err(RunError::runtime(format!("'{name}' is not a task handle")))
            }
        }
    }

    // Any settled entry turns the whole join into the misuse it is.
    if !settled.is_empty() || handles.is_empty() {
        return Ok(JoinTarget::SettledMany(settled));
    }
    if handles.len() == 1 {
        return Ok(JoinTarget::Handle(handles.remove(0)));
    }
    Ok(JoinTarget::Handles(handles))
}

fn expand_batch(
    label: &Option<String>,
    tasks: &[TaskSpec],
    bindings: &HashMap<String, Binding>,
) -> Result<Batch, RunError> {
    let inputs = tasks
        .iter()
        .map(|task| expand(task, bindings))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Batch {
        label: label.clone(),
        inputs,
    })
}

/// Replace `{workspace:<name>}` in a task's text fields.
fn expand(task: &TaskSpec, bindings: &HashMap<String, Binding>) -> Result<TaskSpec, RunError> {
    let mut task = task.clone();
    task.task = expand_text(&task.task, bindings)?;
    task.system_prompt = expand_text(&task.system_prompt, bindings)?;
    let cwd = task.cwd.to_string_lossy().into_owned();
    if cwd.contains(WORKSPACE_PREFIX) {
        task.cwd = PathBuf::from(expand_text(&cwd, bindings)?);
    }
    Ok(task)
}

fn expand_text(text: &str, bindings: &HashMap<String, Binding>) -> Result<String, RunError> {
    let mut expanded = text.to_string();
    for name in workspace_refs(text) {
        let Some(Binding::Workspace(path)) = bindings.get(name) else {
            return Err(RunError::runtime(format!("unknown workspace '{name}'")));
        };
        expanded = expanded.replace(
            &format!("{WORKSPACE_PREFIX}{name}}}"),
            &path.to_string_lossy(),
        );
    }
    Ok(expanded)
}

fn task_workspace_refs(task: &TaskSpec) -> Vec<&str> {
    let mut refs = workspace_refs(&task.task);
    refs.extend(workspace_refs(&task.system_prompt));
    if let Some(cwd) = task.cwd.to_str() {
        refs.extend(workspace_refs(cwd));
    }
    refs
}

/// Names referenced as `{workspace:<name>}`. Unterminated references are
/// left alone.
fn workspace_refs(text: &str) -> Vec<&str> {
    let mut refs = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(WORKSPACE_PREFIX) {
        let after = &rest[start + WORKSPACE_PREFIX.len()..];
        let Some(end) = after.find('}') else {
            break;
        };
        refs.push(&after[..end]);
        rest = &after[end + 1..];
    }
    refs
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::observability::ObservabilityStore;
    use crate::testing::FakeRunner;
    use subagent_core::{ErrorCode, RunId};
    use tokio_util::sync::CancellationToken;

    fn runtime(runner: Arc<FakeRunner>, artifacts: &std::path::Path) -> ProgramRuntime {
        let store = Arc::new(ObservabilityStore::default());
        let run_id = RunId::new("run-program");
        store.create_run(&run_id, true, artifacts);
        ProgramRuntime::new(run_id, runner, &CancellationToken::new(), store)
    }

    #[test]
    fn test_parse_program() {
        let program = Program::from_json(
            r#"{
                "name": "review",
                "steps": [
                    {"op": "workspace", "bind": "notes"},
                    {"op": "spawn", "bind": "scan", "task": {"agent": "scout", "task": "scan", "model": "m1"}},
                    {"op": "parallel", "bind": "checks", "tasks": [
                        {"agent": "a", "task": "x", "model": "m1"},
                        {"agent": "b", "task": "y", "model": "m1", "tools": ["read"]}
                    ]},
                    {"op": "join", "bind": "found", "handles": ["scan"]},
                    {"op": "log", "level": "warning", "message": "careful"},
                    {"op": "artifact", "path": "summary.md", "content": "done"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(program.steps.len(), 6);
        assert_eq!(program.task_count(), 3);
        assert!(matches!(
            &program.steps[4],
            Instruction::Log { level: EventKind::Warning, .. }
        ));
        program.check().unwrap();
    }

    #[test]
    fn test_malformed_program_is_runtime_error() {
        let err = Program::from_json(r#"{"steps": [{"op": "teleport"}]}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::Runtime);
        assert!(!err.recoverable);
    }

    #[test]
    fn test_check_rejects_bad_bindings() {
        let task = TaskSpec::new("scout", "x", "m1");
        let join_unknown = Program {
            name: None,
            steps: vec![Instruction::Join {
                bind: "r".into(),
                handles: vec!["ghost".into()],
            }],
        };
        assert_eq!(join_unknown.check().unwrap_err().code, ErrorCode::Runtime);

        let duplicate = Program {
            name: None,
            steps: vec![
                Instruction::Spawn { bind: "a".into(), task: task.clone() },
                Instruction::Spawn { bind: "a".into(), task: task.clone() },
            ],
        };
        assert!(duplicate.check().unwrap_err().message.contains("defined twice"));

        let unknown_workspace = Program {
            name: None,
            steps: vec![Instruction::Spawn {
                bind: "a".into(),
                task: TaskSpec::new("scout", "write to {workspace:tmp}", "m1"),
            }],
        };
        assert!(unknown_workspace.check().unwrap_err().message.contains("unknown workspace 'tmp'"));

        let no_model = Program {
            name: None,
            steps: vec![Instruction::Spawn {
                bind: "a".into(),
                task: TaskSpec::new("scout", "x", ""),
            }],
        };
        assert_eq!(no_model.check().unwrap_err().code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_workspace_refs() {
        assert_eq!(
            workspace_refs("a {workspace:one} b {workspace:two} {workspace:open"),
            vec!["one", "two"]
        );
        assert!(workspace_refs("{previous}").is_empty());
    }

    #[tokio::test]
    async fn test_execute_program() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let runtime = runtime(runner.clone(), dir.path());
        let program = Program::from_json(
            r#"{"steps": [
                {"op": "workspace", "bind": "notes"},
                {"op": "spawn", "bind": "scan", "task": {"agent": "scout", "task": "scan into {workspace:notes}", "model": "m1"}},
                {"op": "sequence", "bind": "steps", "label": "follow-up", "tasks": [
                    {"agent": "a", "task": "first", "model": "m1"},
                    {"agent": "b", "task": "second", "model": "m1"}
                ]},
                {"op": "join", "bind": "found", "handles": ["scan"]},
                {"op": "artifact", "path": "out/summary.md", "content": "all good"},
                {"op": "log", "message": "finished"}
            ]}"#,
        )
        .unwrap();

        let output = runtime.execute(&program).await.unwrap();

        let notes = dir.path().join("run-program/workspace/notes");
        assert!(notes.is_dir());
        assert!(runner
            .seen_tasks()
            .contains(&format!("scan into {}", notes.display())));
        assert_eq!(output["steps"].len(), 2);
        assert_eq!(output["found"][0].agent, "scout");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("run-program/out/summary.md")).unwrap(),
            "all good"
        );
        assert_eq!(runtime.results().len(), 3);
    }

    #[tokio::test]
    async fn test_joining_results_binding_gives_hint() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let runtime = runtime(runner, dir.path());
        let program = Program::from_json(
            r#"{"steps": [
                {"op": "spawn", "bind": "scan", "task": {"agent": "scout", "task": "scan", "model": "m1"}},
                {"op": "join", "bind": "found", "handles": ["scan"]},
                {"op": "join", "bind": "again", "handles": ["found"]}
            ]}"#,
        )
        .unwrap();

        let err = runtime.execute(&program).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.message.contains("not the result of join()"));
    }
}
