//! Error types for launching task subprocesses.

use thiserror::Error;

/// Errors that can occur before a task's event stream starts flowing.
///
/// None of these escape `execute`: they are folded into a failed
/// `ExecutionResult` (exit code 1) so callers treat them like any other
/// task failure.
#[derive(Debug, Error)]
pub enum LauncherError {
    /// Launcher executable not found.
    #[error("task launcher not found at '{0}'. Ensure it is installed and on PATH.")]
    LauncherNotFound(String),

    /// Failed to spawn the launcher process.
    #[error("failed to spawn task launcher: {0}")]
    SpawnError(#[from] std::io::Error),

    /// Failed to write the private system prompt file.
    #[error("failed to write system prompt file: {0}")]
    PromptFile(std::io::Error),

    /// A stdio pipe was not captured.
    #[error("failed to capture launcher {0}")]
    MissingPipe(&'static str),
}
