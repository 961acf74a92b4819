//! Orchestrator configuration.

use std::path::PathBuf;

/// Hard ceiling on the number of tasks in one parallel batch.
pub const DEFAULT_MAX_PARALLEL_TASKS: usize = 8;

/// Number of batch tasks allowed to run at the same time.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Events kept in memory per run.
pub const DEFAULT_EVENT_WINDOW: usize = 50;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Batches larger than this are rejected before anything is spawned.
    pub max_parallel_tasks: usize,

    /// Worker pool size for parallel batches.
    pub max_concurrency: usize,

    /// Number of observability events surfaced per run.
    pub event_window: usize,

    /// Directory holding one artifact directory per run.
    pub artifacts_root: PathBuf,

    /// Write events, artifacts and `run.json` to disk.
    pub persist: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: DEFAULT_MAX_PARALLEL_TASKS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            event_window: DEFAULT_EVENT_WINDOW,
            artifacts_root: std::env::temp_dir().join("subagent-runs"),
            persist: true,
        }
    }
}
