//! Subagent Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Subprocesses
//! - Async runtimes
//! - Filesystem layout
//!
//! All types here describe delegated tasks, their results, and the runs
//! that group them.

pub mod error;
pub mod event;
pub mod ids;
pub mod message;
pub mod result;
pub mod run;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::{CoreError, ErrorCode, RunError};
pub use event::ObservabilityEvent;
pub use ids::{RunId, TaskId};
pub use message::{ContentBlock, Message, MessageCost, MessageUsage, Usage};
pub use result::{ExecutionResult, EXIT_RUNNING};
pub use run::{ObservabilitySummary, ResultSnapshot, RunRecord, RunSnapshot};
pub use status::{EventKind, RunStatus};
pub use task::{TaskSpec, PREVIOUS_PLACEHOLDER};
