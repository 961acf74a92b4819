//! Lifecycle tracking for top-level runs.
//!
//! Each run moves from `running` to exactly one of `done`, `failed` or
//! `cancelled`. Transitions requested after that are ignored and reported
//! as `false`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures_util::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use subagent_core::{ExecutionResult, RunError, RunId, RunRecord, RunSnapshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Settled value of a run's driver future.
pub type RunOutcome = Result<Vec<ExecutionResult>, RunError>;

/// Driver of a run, awaitable by any number of callers.
pub type RunFuture = Shared<BoxFuture<'static, RunOutcome>>;

/// Topology of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Single,
    Parallel,
    Chain,
    Program,
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Single => "single",
            Self::Parallel => "parallel",
            Self::Chain => "chain",
            Self::Program => "program",
        };
        f.write_str(name)
    }
}

/// Descriptive data attached to a run at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub kind: RunKind,
    /// Number of tasks known up front (0 for programs).
    pub task_count: usize,
}

struct RunEntry {
    record: RunRecord,
    metadata: Option<RunMetadata>,
    result: Option<RunFuture>,
    cancel: Option<CancellationToken>,
    acknowledged: bool,
    historical: bool,
    /// Set once the driver has recorded its final results.
    finalized: bool,
}

/// Registry of live and historical runs.
#[derive(Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<RunId, RunEntry>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new running run.
    pub fn register(
        &self,
        run_id: RunId,
        record: RunRecord,
        result: RunFuture,
        cancel: CancellationToken,
        metadata: RunMetadata,
    ) -> Result<(), RunError> {
        let mut runs = self.write();
        if runs.contains_key(&run_id) {
            return Err(RunError::invalid_input(format!("run {run_id} is already registered")));
        }
        info!(%run_id, kind = %metadata.kind, tasks = metadata.task_count, "Registered run");
        runs.insert(
            run_id,
            RunEntry {
                record,
                metadata: Some(metadata),
                result: Some(result),
                cancel: Some(cancel),
                acknowledged: false,
                historical: false,
                finalized: false,
            },
        );
        Ok(())
    }

    /// Replace the in-progress results of a running run.
    pub fn update_summary(&self, run_id: &RunId, results: Vec<ExecutionResult>) -> bool {
        let mut runs = self.write();
        match runs.get_mut(run_id) {
            Some(entry) if entry.record.status.is_active() => {
                entry.record.results = results;
                true
            }
            _ => false,
        }
    }

    /// Mark a run as done.
    pub fn complete(&self, run_id: &RunId, results: Vec<ExecutionResult>) -> bool {
        self.transition(run_id, |record| record.complete(results))
    }

    /// Mark a run as failed, keeping whatever results it has.
    pub fn fail(&self, run_id: &RunId, error: RunError) -> bool {
        self.transition(run_id, |record| record.fail(error))
    }

    /// Cancel a running run: trips its token and marks it cancelled.
    ///
    /// A no-op for runs that already finished.
    pub fn cancel(&self, run_id: &RunId, reason: &str) -> bool {
        let token = {
            let runs = self.read();
            match runs.get(run_id) {
                Some(entry) if entry.record.status.is_active() => entry.cancel.clone(),
                _ => return false,
            }
        };
        if let Some(token) = token {
            token.cancel();
        }
        self.transition(run_id, |record| record.cancel(reason))
    }

    /// Record the driver's last results for a finished run.
    ///
    /// A run cancelled through [`cancel`](Self::cancel) becomes terminal
    /// before its driver drains, so the driver's results land here once.
    /// Results still running are settled as aborted.
    pub fn finalize(&self, run_id: &RunId, results: Vec<ExecutionResult>) -> bool {
        let mut runs = self.write();
        let Some(entry) = runs.get_mut(run_id) else {
            return false;
        };
        if entry.finalized || !entry.record.status.is_terminal() {
            return false;
        }
        entry.finalized = true;
        if !results.is_empty() || entry.record.results.is_empty() {
            entry.record.results = results;
        }
        let reason = entry
            .record
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "run ended before the task settled".to_string());
        let aborted = entry.record.abort_pending(&reason);
        if aborted > 0 {
            debug!(%run_id, aborted, "Settled unfinished tasks of finished run");
        }
        true
    }

    /// Hide a finished run from [`get_visible`](Self::get_visible).
    pub fn acknowledge(&self, run_id: &RunId) -> bool {
        let mut runs = self.write();
        match runs.get_mut(run_id) {
            Some(entry) if entry.record.status.is_terminal() => {
                entry.acknowledged = true;
                true
            }
            _ => false,
        }
    }

    /// Runs still in progress.
    pub fn get_active(&self) -> Vec<RunRecord> {
        self.collect(|entry| entry.record.status.is_active())
    }

    /// Active runs plus finished runs nobody has acknowledged yet.
    pub fn get_visible(&self) -> Vec<RunRecord> {
        self.collect(|entry| entry.record.status.is_active() || !entry.acknowledged)
    }

    pub fn get(&self, run_id: &RunId) -> Option<RunRecord> {
        self.read().get(run_id).map(|entry| entry.record.clone())
    }

    pub fn metadata(&self, run_id: &RunId) -> Option<RunMetadata> {
        self.read().get(run_id)?.metadata.clone()
    }

    /// Wait for a run's driver to settle and return its final record.
    pub async fn wait(&self, run_id: &RunId) -> Result<RunRecord, RunError> {
        let result = {
            let runs = self.read();
            let entry = runs
                .get(run_id)
                .ok_or_else(|| RunError::invalid_input(format!("unknown run {run_id}")))?;
            entry.result.clone()
        };
        if let Some(result) = result {
            // The outcome is already reflected in the record.
            let _ = result.await;
        }
        self.get(run_id)
            .ok_or_else(|| RunError::runtime(format!("run {run_id} disappeared while waiting")))
    }

    /// Add a run recovered from disk. Historical runs start acknowledged.
    pub fn load_historical(&self, snapshot: &RunSnapshot) -> bool {
        let mut runs = self.write();
        if runs.contains_key(&snapshot.run_id) {
            debug!(run_id = %snapshot.run_id, "Run already known, skipping snapshot");
            return false;
        }
        let record = snapshot.to_record();
        if record.status.is_active() {
            warn!(run_id = %snapshot.run_id, "Ignoring snapshot of a run that never finished");
            return false;
        }
        runs.insert(
            snapshot.run_id.clone(),
            RunEntry {
                record,
                metadata: None,
                result: None,
                cancel: None,
                acknowledged: true,
                historical: true,
                finalized: true,
            },
        );
        true
    }

    /// Forget every run loaded from disk. Returns how many were removed.
    pub fn clear_historical(&self) -> usize {
        let mut runs = self.write();
        let before = runs.len();
        runs.retain(|_, entry| !entry.historical);
        before - runs.len()
    }

    fn transition(
        &self,
        run_id: &RunId,
        apply: impl FnOnce(&mut RunRecord) -> Result<(), subagent_core::CoreError>,
    ) -> bool {
        let mut runs = self.write();
        let Some(entry) = runs.get_mut(run_id) else {
            return false;
        };
        match apply(&mut entry.record) {
            Ok(()) => {
                info!(%run_id, status = %entry.record.status, "Run finished");
                true
            }
            Err(e) => {
                debug!(%run_id, error = %e, "Ignoring transition of finished run");
                false
            }
        }
    }

    fn collect(&self, keep: impl Fn(&RunEntry) -> bool) -> Vec<RunRecord> {
        let mut records: Vec<RunRecord> = self
            .read()
            .values()
            .filter(|entry| keep(entry))
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by_key(|r| r.started_at);
        records
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<RunId, RunEntry>> {
        self.runs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<RunId, RunEntry>> {
        self.runs.write().unwrap_or_else(PoisonError::into_inner)
    }
}
