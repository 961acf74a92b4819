//! Task launcher for subagent orchestration.
//!
//! Runs a single task in its own launcher subprocess, streams its JSON
//! event output into an [`ExecutionResult`](subagent_core::ExecutionResult),
//! and handles cancellation with a SIGTERM → SIGKILL escalation.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use subagent_core::{TaskId, TaskSpec};
//! use subagent_launcher::{LauncherExecutor, TaskRunner};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn run_agent() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = LauncherExecutor::new("pi").with_grace_period(Duration::from_secs(2));
//!     let spec = TaskSpec::new("scout", "What is 2 + 2?", "sonnet");
//!
//!     let result = executor
//!         .run(TaskId::generate(), &spec, CancellationToken::new(), None)
//!         .await?;
//!
//!     println!("exit {}: {}", result.exit_code, result.final_output());
//!     Ok(())
//! }
//! ```

mod error;
mod executor;
mod prompt;
mod runner;
mod types;

pub use error::LauncherError;
pub use executor::{LauncherExecutor, DEFAULT_GRACE_PERIOD, DEFAULT_LAUNCHER};
pub use prompt::PromptFile;
pub use runner::{ProgressFn, TaskRunner};
pub use types::LauncherEvent;
