//! Task executor that runs each task in its own launcher subprocess.
//!
//! The launcher is started in JSON mode; its stdout is parsed line by line
//! into [`LauncherEvent`]s which are folded into an [`ExecutionResult`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use subagent_core::{ExecutionResult, RunError, TaskId, TaskSpec};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::LauncherError;
use crate::prompt::PromptFile;
use crate::runner::{ProgressFn, TaskRunner};
use crate::types::LauncherEvent;

/// Launcher looked up on PATH when none is configured.
pub const DEFAULT_LAUNCHER: &str = "pi";

/// Time a process gets to exit after SIGTERM before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Executor for launcher subprocesses.
///
/// # Example
///
/// ```rust,no_run
/// use subagent_core::{TaskId, TaskSpec};
/// use subagent_launcher::LauncherExecutor;
/// use tokio_util::sync::CancellationToken;
///
/// async fn run() -> Result<(), Box<dyn std::error::Error>> {
///     let executor = LauncherExecutor::new("pi");
///     let spec = TaskSpec::new("scout", "find TODOs", "sonnet");
///
///     let result = executor
///         .execute(TaskId::generate(), &spec, CancellationToken::new(), None)
///         .await?;
///
///     println!("{}", result.final_output());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct LauncherExecutor {
    /// Path to the launcher executable.
    program: PathBuf,

    /// Arguments placed before the launcher flags (e.g. a script path).
    base_args: Vec<OsString>,

    /// Grace period between SIGTERM and SIGKILL.
    grace_period: Duration,

    /// Additional environment variables.
    env_vars: Vec<(String, String)>,
}

impl LauncherExecutor {
    /// Create a new executor for the given launcher.
    ///
    /// The path can be a bare name to use PATH lookup, or a full path.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
            env_vars: Vec::new(),
        }
    }

    /// Add arguments that precede the generated launcher flags.
    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the SIGTERM → SIGKILL grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Launcher executable.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Configured grace period.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Launcher flags for a task, in order, without the base arguments.
    pub fn launcher_args(spec: &TaskSpec, prompt_path: Option<&Path>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--mode".into(), "json".into(), "-p".into()];

        args.push("--model".into());
        args.push(spec.model.clone().into());

        if !spec.tools.is_empty() {
            args.push("--tools".into());
            args.push(spec.tools.join(",").into());
        }

        if let Some(path) = prompt_path {
            args.push("--append-system-prompt".into());
            args.push(path.as_os_str().to_owned());
        }

        match &spec.session_path {
            Some(path) => {
                args.push("--session".into());
                args.push(path.as_os_str().to_owned());
            }
            None => args.push("--no-session".into()),
        }

        // Prefixed so a task starting with '-' is never read as a flag.
        args.push(format!("Task: {}", spec.task).into());
        args
    }

    fn spawn_child(&self, spec: &TaskSpec, prompt: Option<&PromptFile>) -> Result<Child, LauncherError> {
        if !spec.cwd.is_dir() {
            return Err(LauncherError::SpawnError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("working directory '{}' does not exist", spec.cwd.display()),
            )));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .args(Self::launcher_args(spec, prompt.map(PromptFile::path)))
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        debug!("Full command: {:?}", cmd);

        cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LauncherError::LauncherNotFound(self.program.display().to_string())
            } else {
                LauncherError::SpawnError(e)
            }
        })
    }

    /// Execute one task.
    ///
    /// Launch failures and non-zero exits come back as `Ok` results with a
    /// non-zero exit code. `Err` means invalid input or cancellation.
    pub async fn execute(
        &self,
        task_id: TaskId,
        spec: &TaskSpec,
        cancel: CancellationToken,
        progress: Option<ProgressFn>,
    ) -> Result<ExecutionResult, RunError> {
        spec.validate()?;
        if cancel.is_cancelled() {
            return Err(RunError::cancelled(format!(
                "task {task_id} ({}) cancelled before launch",
                spec.agent
            )));
        }

        let mut result = ExecutionResult::pending(task_id, spec);
        info!(
            task_id = %result.task_id,
            agent = %spec.agent,
            model = %spec.model,
            launcher = %self.program.display(),
            cwd = %spec.cwd.display(),
            "Launching task"
        );

        // Dropped on every return path below, removing the temp directory.
        let prompt = match PromptFile::create(&spec.agent, &spec.system_prompt) {
            Ok(prompt) => prompt,
            Err(e) => return Ok(launch_failed(result, e)),
        };

        let mut child = match self.spawn_child(spec, prompt.as_ref()) {
            Ok(child) => child,
            Err(e) => return Ok(launch_failed(result, e)),
        };

        let Some(stdout) = child.stdout.take() else {
            return Ok(launch_failed(result, LauncherError::MissingPipe("stdout")));
        };
        let stderr_reader = child.stderr.take().map(|s| tokio::spawn(collect_stderr(s)));

        let drained = tokio::select! {
            pumped = pump_events(stdout, &mut result, progress.as_ref()) => {
                match pumped {
                    Ok(events) => debug!(task_id = %result.task_id, events, "Launcher stdout closed"),
                    Err(e) => warn!(task_id = %result.task_id, error = %e, "Error reading launcher stdout"),
                }
                true
            }
            _ = cancel.cancelled() => false,
        };

        let status = if drained {
            tokio::select! {
                status = child.wait() => Some(status),
                _ = cancel.cancelled() => None,
            }
        } else {
            None
        };

        let Some(status) = status else {
            self.terminate(&mut child, &result.task_id).await;
            if let Some(reader) = stderr_reader {
                reader.abort();
            }
            return Err(RunError::cancelled(format!(
                "task {} ({}) was cancelled",
                result.task_id, result.agent
            )));
        };

        result.stderr = match stderr_reader {
            Some(reader) => reader.await.unwrap_or_default(),
            None => String::new(),
        };

        if let Some(path) = &spec.session_path {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                result.session_path = Some(path.clone());
            } else {
                warn!(
                    task_id = %result.task_id,
                    path = %path.display(),
                    "Launcher did not write the requested session file"
                );
            }
        }

        // The process may win the race against a kill that was just requested.
        if cancel.is_cancelled() {
            return Err(RunError::cancelled(format!(
                "task {} ({}) was cancelled",
                result.task_id, result.agent
            )));
        }

        let exit_code = match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                error!(task_id = %result.task_id, error = %e, "Failed to wait for launcher");
                -1
            }
        };
        result.settle(exit_code);

        info!(
            task_id = %result.task_id,
            agent = %result.agent,
            exit_code = result.exit_code,
            turns = result.usage.turns,
            stop_reason = ?result.stop_reason,
            "Task finished"
        );

        drop(prompt);
        Ok(result)
    }

    /// SIGTERM, then SIGKILL if the process outlives the grace period.
    async fn terminate(&self, child: &mut Child, task_id: &TaskId) {
        send_terminate(child, task_id);

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => {
                info!(%task_id, ?status, "Task process exited after terminate signal");
            }
            Ok(Err(e)) => {
                warn!(%task_id, error = %e, "Error waiting for task process, killing");
                child.kill().await.ok();
            }
            Err(_) => {
                warn!(
                    %task_id,
                    grace_ms = self.grace_period.as_millis() as u64,
                    "Task process ignored terminate signal, killing"
                );
                if let Err(e) = child.kill().await {
                    warn!(%task_id, error = %e, "Failed to kill task process");
                }
            }
        }
    }
}

impl Default for LauncherExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_LAUNCHER)
    }
}

#[async_trait]
impl TaskRunner for LauncherExecutor {
    async fn run(
        &self,
        task_id: TaskId,
        spec: &TaskSpec,
        cancel: CancellationToken,
        progress: Option<ProgressFn>,
    ) -> Result<ExecutionResult, RunError> {
        self.execute(task_id, spec, cancel, progress).await
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child, task_id: &TaskId) {
    if let Some(pid) = child.id() {
        // SAFETY: pid comes from our own, not yet reaped Child handle.
        #[allow(unsafe_code)]
        #[allow(clippy::cast_possible_wrap)]
        let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            warn!(%task_id, pid, error = %err, "Failed to send SIGTERM");
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, task_id: &TaskId) {
    if let Err(e) = child.start_kill() {
        warn!(%task_id, error = %e, "Failed to terminate task process");
    }
}

fn launch_failed(mut result: ExecutionResult, err: LauncherError) -> ExecutionResult {
    error!(task_id = %result.task_id, agent = %result.agent, error = %err, "Failed to launch task");
    result.stderr = err.to_string();
    result.error_message = Some(err.to_string());
    result.settle(1);
    result
}

/// Fold every recognized event on `reader` into `result`.
///
/// A final line without a trailing newline is still parsed. Returns the
/// number of recognized events.
async fn pump_events<R>(
    reader: R,
    result: &mut ExecutionResult,
    progress: Option<&ProgressFn>,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut recognized = 0u64;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&buf);
        let Some(message) = LauncherEvent::parse(&line).and_then(LauncherEvent::into_message)
        else {
            trace!(task_id = %result.task_id, "Skipping unrecognized launcher line");
            continue;
        };

        recognized += 1;
        result.record_message(message);
        if let Some(progress) = progress {
            progress(result.clone());
        }
    }

    Ok(recognized)
}

async fn collect_stderr(mut stderr: ChildStderr) -> String {
    let mut buf = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut buf).await {
        debug!(error = %e, "Error reading launcher stderr");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
