//! Subagent Orchestrator Library
//!
//! Runs delegated tasks in three topologies (single task, bounded parallel
//! batch, chain with output threading) plus caller-authored programs, and
//! tracks every top-level run in a registry backed by an on-disk event and
//! artifact log.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use subagent_core::TaskSpec;
//! use subagent_launcher::LauncherExecutor;
//! use subagent_orchestrator::{Orchestrator, OrchestratorConfig, RunRequest};
//!
//! async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(
//!         OrchestratorConfig::default(),
//!         Arc::new(LauncherExecutor::default()),
//!     );
//!
//!     let run_id = orchestrator.submit(RunRequest::Chain(vec![
//!         TaskSpec::new("scout", "list the TODOs in src/", "sonnet"),
//!         TaskSpec::new("planner", "group these by module: {previous}", "sonnet"),
//!     ]))?;
//!
//!     let record = orchestrator.wait(&run_id).await?;
//!     println!("{}: {}", record.status, record.task);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod chain;
pub mod config;
pub mod observability;
pub mod orchestrator;
pub mod persist;
pub mod registry;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use batch::{run_parallel, BatchOptions, BatchProgress};
pub use chain::{run_chain, ChainFailure, ChainOutcome};
pub use config::OrchestratorConfig;
pub use observability::ObservabilityStore;
pub use orchestrator::{Orchestrator, RunRequest};
pub use persist::{load_snapshots, read_snapshot, write_snapshot, PersistError};
pub use registry::{RunFuture, RunKind, RunMetadata, RunOutcome, RunRegistry};
pub use runtime::{
    Batch, Instruction, JoinTarget, Joined, Observer, Program, ProgramOutput, ProgramRuntime,
    ShutdownReport, SpawnHandle, Workspace,
};
