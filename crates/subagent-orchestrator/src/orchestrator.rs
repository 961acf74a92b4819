//! Entry point tying runners, the registry and the observability store
//! together.

use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::json;
use subagent_core::{
    EventKind, ExecutionResult, RunError, RunId, RunRecord, RunSnapshot, RunStatus, TaskId,
    TaskSpec,
};
use subagent_launcher::{ProgressFn, TaskRunner};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batch::{run_parallel, validate_batch, BatchOptions, BatchProgress};
use crate::chain::{run_chain, validate_chain};
use crate::config::OrchestratorConfig;
use crate::observability::ObservabilityStore;
use crate::persist::{load_snapshots, write_snapshot};
use crate::registry::{RunKind, RunMetadata, RunOutcome, RunRegistry};
use crate::runtime::{Program, ProgramRuntime};

/// Work submitted as one run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunRequest {
    Single(TaskSpec),
    Parallel(Vec<TaskSpec>),
    Chain(Vec<TaskSpec>),
    Program(Program),
}

impl RunRequest {
    pub fn kind(&self) -> RunKind {
        match self {
            Self::Single(_) => RunKind::Single,
            Self::Parallel(_) => RunKind::Parallel,
            Self::Chain(_) => RunKind::Chain,
            Self::Program(_) => RunKind::Program,
        }
    }

    pub fn task_count(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Parallel(tasks) | Self::Chain(tasks) => tasks.len(),
            Self::Program(program) => program.task_count(),
        }
    }

    /// Short description stored as the run's `task`.
    pub fn describe(&self) -> String {
        let agents = |tasks: &[TaskSpec], sep: &str| {
            tasks
                .iter()
                .map(|t| t.agent.as_str())
                .collect::<Vec<_>>()
                .join(sep)
        };
        match self {
            Self::Single(spec) => spec.task.clone(),
            Self::Parallel(tasks) => format!("parallel ({} tasks): {}", tasks.len(), agents(tasks, ", ")),
            Self::Chain(tasks) => format!("chain ({} steps): {}", tasks.len(), agents(tasks, " -> ")),
            Self::Program(program) => match &program.name {
                Some(name) => format!("program {name}"),
                None => format!("program ({} steps)", program.steps.len()),
            },
        }
    }

    /// Validation done before a run is registered.
    pub fn validate(&self, options: &BatchOptions) -> Result<(), RunError> {
        match self {
            Self::Single(spec) => spec.validate(),
            Self::Parallel(tasks) => validate_batch(tasks, options),
            Self::Chain(steps) => validate_chain(steps),
            Self::Program(program) => program.check(),
        }
    }
}

/// Submits runs and tracks them until they finish.
pub struct Orchestrator {
    config: OrchestratorConfig,
    runner: Arc<dyn TaskRunner>,
    registry: Arc<RunRegistry>,
    store: Arc<ObservabilityStore>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, runner: Arc<dyn TaskRunner>) -> Self {
        let store = Arc::new(ObservabilityStore::new(config.event_window));
        Self {
            config,
            runner,
            registry: Arc::new(RunRegistry::new()),
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ObservabilityStore> {
        &self.store
    }

    /// Process-wide token; every run's token is a child of it.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            concurrency: self.config.max_concurrency,
            max_tasks: self.config.max_parallel_tasks,
        }
    }

    /// Validate and start a run in the background.
    ///
    /// Invalid requests are rejected here, before any task is spawned or
    /// any run is registered.
    pub fn submit(&self, request: RunRequest) -> Result<RunId, RunError> {
        let options = self.batch_options();
        request.validate(&options)?;

        let run_id = RunId::generate();
        let kind = request.kind();
        let metadata = RunMetadata {
            kind,
            task_count: request.task_count(),
        };
        let cancel = self.cancel.child_token();
        let artifacts_dir =
            self.store
                .create_run(&run_id, self.config.persist, &self.config.artifacts_root);
        self.store.push(
            &run_id,
            EventKind::Info,
            format!("{kind} run started"),
            Some(json!({ "kind": kind, "tasks": metadata.task_count })),
        );

        let record = RunRecord::new(run_id.clone(), request.describe());
        let driver = RunDriver {
            run_id: run_id.clone(),
            runner: self.runner.clone(),
            registry: self.registry.clone(),
            store: self.store.clone(),
            cancel: cancel.clone(),
            options,
            persist: artifacts_dir.is_some(),
        };
        let future = driver.drive(request).boxed().shared();

        self.registry
            .register(run_id.clone(), record, future.clone(), cancel, metadata)?;
        tokio::spawn(future);

        info!(%run_id, %kind, "Run submitted");
        Ok(run_id)
    }

    /// Cancel a running run. Returns false if it already finished.
    pub fn cancel(&self, run_id: &RunId) -> bool {
        self.registry.cancel(run_id, "cancelled by request")
    }

    /// Current record of a run, including its observability summary.
    pub fn get(&self, run_id: &RunId) -> Option<RunRecord> {
        self.registry.get(run_id).map(|record| self.with_observability(record))
    }

    /// Wait for a run to finish and return its final record.
    pub async fn wait(&self, run_id: &RunId) -> Result<RunRecord, RunError> {
        let record = self.registry.wait(run_id).await?;
        Ok(self.with_observability(record))
    }

    /// Load finished runs from the artifacts root. Returns how many were added.
    pub fn load_history(&self) -> usize {
        let loaded = load_snapshots(&self.config.artifacts_root)
            .iter()
            .filter(|snapshot| self.registry.load_historical(snapshot))
            .count();
        info!(root = %self.config.artifacts_root.display(), loaded, "Loaded run history");
        loaded
    }

    /// Cancel every active run and wait for all of them to settle.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for record in self.registry.get_active() {
            if let Err(e) = self.registry.wait(&record.run_id).await {
                warn!(run_id = %record.run_id, error = %e, "Failed waiting for run during shutdown");
            }
        }
    }

    fn with_observability(&self, mut record: RunRecord) -> RunRecord {
        if let Some(summary) = self.store.to_summary(&record.run_id) {
            record.observability = summary;
        }
        record
    }
}

/// Everything one run's background task needs.
struct RunDriver {
    run_id: RunId,
    runner: Arc<dyn TaskRunner>,
    registry: Arc<RunRegistry>,
    store: Arc<ObservabilityStore>,
    cancel: CancellationToken,
    options: BatchOptions,
    persist: bool,
}

/// Final results of a run and what, if anything, went wrong.
struct Settled {
    results: Vec<ExecutionResult>,
    error: Option<RunError>,
}

impl RunDriver {
    async fn drive(self, request: RunRequest) -> RunOutcome {
        let mut settled = match request {
            RunRequest::Single(spec) => self.single(spec).await,
            RunRequest::Parallel(tasks) => self.parallel(tasks).await,
            RunRequest::Chain(steps) => self.chain(steps).await,
            RunRequest::Program(program) => self.program(program).await,
        };
        self.finish(&mut settled);
        match settled.error {
            Some(e) => Err(e),
            None => Ok(settled.results),
        }
    }

    async fn single(&self, spec: TaskSpec) -> Settled {
        let relay: ProgressFn = {
            let registry = self.registry.clone();
            let run_id = self.run_id.clone();
            Arc::new(move |snapshot| {
                registry.update_summary(&run_id, vec![snapshot]);
            })
        };

        match self
            .runner
            .run(TaskId::generate(), &spec, self.cancel.child_token(), Some(relay))
            .await
        {
            Ok(result) => {
                let error = result.is_failure().then(|| {
                    RunError::runtime(format!("{} failed: {}", result.agent, result.failure_message()))
                });
                Settled {
                    results: vec![result],
                    error,
                }
            }
            Err(e) => Settled {
                results: self.current_results(),
                error: Some(e),
            },
        }
    }

    async fn parallel(&self, tasks: Vec<TaskSpec>) -> Settled {
        let (tx, rx) = watch::channel(BatchProgress::default());
        let latest = tx.subscribe();
        tokio::spawn(relay_progress(rx, self.registry.clone(), self.run_id.clone(), |p: &BatchProgress| {
            p.results.clone()
        }));

        match run_parallel(self.runner.clone(), tasks, self.options, self.cancel.clone(), Some(tx)).await {
            Ok(results) => {
                let failed = results.iter().filter(|r| r.is_failure()).count();
                if failed > 0 {
                    self.store.push(
                        &self.run_id,
                        EventKind::Warning,
                        format!("{failed} of {} parallel tasks failed", results.len()),
                        None,
                    );
                }
                Settled {
                    results,
                    error: None,
                }
            }
            Err(e) => {
                let results = latest.borrow().results.clone();
                Settled {
                    results,
                    error: Some(e),
                }
            }
        }
    }

    async fn chain(&self, steps: Vec<TaskSpec>) -> Settled {
        let (tx, rx) = watch::channel(Vec::new());
        let latest = tx.subscribe();
        tokio::spawn(relay_progress(rx, self.registry.clone(), self.run_id.clone(), |r: &Vec<ExecutionResult>| {
            r.clone()
        }));

        match run_chain(self.runner.clone(), steps, self.cancel.clone(), Some(tx)).await {
            Ok(outcome) => {
                let error = outcome.failure.as_ref().map(|failure| {
                    RunError::runtime(format!(
                        "chain stopped at step {}: {}",
                        failure.step, failure.message
                    ))
                });
                Settled {
                    results: outcome.results,
                    error,
                }
            }
            Err(e) => {
                let results = latest.borrow().clone();
                Settled {
                    results,
                    error: Some(e),
                }
            }
        }
    }

    async fn program(&self, program: Program) -> Settled {
        let runtime = ProgramRuntime::new(
            self.run_id.clone(),
            self.runner.clone(),
            &self.cancel,
            self.store.clone(),
        );
        {
            let registry = self.registry.clone();
            let run_id = self.run_id.clone();
            runtime.on_summary(Arc::new(move |results| {
                registry.update_summary(&run_id, results);
            }));
        }

        let outcome = runtime.execute(&program).await;
        runtime.shutdown(outcome.is_err()).await;
        if !self.persist {
            runtime.workspace().cleanup();
        }

        Settled {
            results: runtime.results(),
            error: outcome.err(),
        }
    }

    fn current_results(&self) -> Vec<ExecutionResult> {
        self.registry
            .get(&self.run_id)
            .map(|record| record.results)
            .unwrap_or_default()
    }

    /// Record the terminal state and write `run.json`.
    fn finish(&self, settled: &mut Settled) {
        let run_id = &self.run_id;
        if let Some(e) = &settled.error {
            for result in &mut settled.results {
                result.abort(&e.message);
            }
        }
        self.registry.update_summary(run_id, settled.results.clone());
        match &settled.error {
            None => self.registry.complete(run_id, settled.results.clone()),
            Some(e) if e.is_cancelled() => self.registry.cancel(run_id, &e.message),
            Some(e) => self.registry.fail(run_id, e.clone()),
        };
        self.registry.finalize(run_id, settled.results.clone());

        // A cancel request may have settled the run before the driver did.
        let Some(record) = self.registry.get(run_id) else {
            return;
        };
        let reason = record.error.as_ref().map(ToString::to_string);
        self.store.set_status(run_id, record.status, reason.as_deref());
        if record.status != RunStatus::Done {
            info!(%run_id, status = %record.status, reason = ?reason, "Run did not complete");
        }

        if let Some(dir) = self.store.artifacts_dir(run_id) {
            match write_snapshot(&dir, &RunSnapshot::from_record(&record)) {
                Ok(path) => self.store.push(
                    run_id,
                    EventKind::Info,
                    "run snapshot written",
                    Some(json!({ "path": path })),
                ),
                Err(e) => warn!(%run_id, error = %e, "Failed to write run snapshot"),
            }
        }
    }
}

async fn relay_progress<T, F>(
    mut rx: watch::Receiver<T>,
    registry: Arc<RunRegistry>,
    run_id: RunId,
    results: F,
) where
    T: Send + Sync + 'static,
    F: Fn(&T) -> Vec<ExecutionResult> + Send + 'static,
{
    while rx.changed().await.is_ok() {
        let current = results(&*rx.borrow_and_update());
        registry.update_summary(&run_id, current);
    }
}
